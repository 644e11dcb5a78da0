use crate::entities::ReservationStatus;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Every failure the engine can report.
#[derive(Debug, Error)]
pub enum Error {
    /// Request rejected before touching the ledger
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// More units requested than are on hand
    #[error("Insufficient stock for item {item_id}{}: requested {requested}, available {available}", variant_suffix(.variant_id))]
    InsufficientStock {
        /// Item whose counter was checked
        item_id: i64,
        /// Variant whose counter was checked, if any
        variant_id: Option<i64>,
        /// Units asked for
        requested: i32,
        /// Units on hand
        available: i32,
    },

    /// Reservation would dip into the stock kept for walk-in buyers
    #[error("Reservation would leave item {item_id}{} below its walk-in floor of {floor}: requested {requested}, in stock {available}", variant_suffix(.variant_id))]
    ReservationFloorViolation {
        /// Item whose counter was checked
        item_id: i64,
        /// Variant whose counter was checked, if any
        variant_id: Option<i64>,
        /// Units asked for
        requested: i32,
        /// Units on hand
        available: i32,
        /// Units withheld from reservations
        floor: i32,
    },

    /// The student already holds a Pending or Approved reservation
    #[error("Student already has an active reservation: {code}")]
    DuplicateActiveReservation {
        /// Code of the existing reservation
        code: String,
    },

    /// Unknown reservation code
    #[error("Reservation not found: {code}")]
    ReservationNotFound {
        /// Code that was looked up
        code: String,
    },

    /// Unknown item id
    #[error("Item not found: {item_id}")]
    ItemNotFound {
        /// Id that was looked up
        item_id: i64,
    },

    /// Unknown variant id, or variant of another item
    #[error("Variant {variant_id} not found for item {item_id}")]
    VariantNotFound {
        /// Parent item
        item_id: i64,
        /// Id that was looked up
        variant_id: i64,
    },

    /// Unknown student id
    #[error("Student not found: {student_id}")]
    StudentNotFound {
        /// Id that was looked up
        student_id: i64,
    },

    /// Unknown payment id
    #[error("Payment not found: {payment_id}")]
    PaymentNotFound {
        /// Id that was looked up
        payment_id: i64,
    },

    /// Self-service cancellation attempted after the window closed
    #[error("Cancellation window for {code} closed at {expired_at}")]
    WindowExpired {
        /// Reservation code
        code: String,
        /// When the window closed
        expired_at: DateTime<Utc>,
    },

    /// The reservation's current status does not allow the action
    #[error("Cannot {action} reservation {code} in status {status}")]
    InvalidTransition {
        /// Reservation code
        code: String,
        /// Current status
        status: ReservationStatus,
        /// Attempted action
        action: &'static str,
    },

    /// The payment is no longer pending
    #[error("Payment {payment_id} is already settled")]
    PaymentAlreadySettled {
        /// Payment id
        payment_id: i64,
    },

    /// Stock for this reservation line was already returned
    #[error("Stock for item {item_id} of reservation {reservation_id} was already released")]
    AlreadyReleased {
        /// Reservation id
        reservation_id: i64,
        /// Item id of the line
        item_id: i64,
    },

    /// Item or variant is deactivated
    #[error("Item {item_id} is not available")]
    ItemUnavailable {
        /// Item id
        item_id: i64,
    },

    /// Hard delete refused to keep the audit trail intact
    #[error("Cannot delete item {item_id}: {transactions} inventory transactions reference it")]
    DeleteBlocked {
        /// Item id
        item_id: i64,
        /// Number of ledger rows found
        transactions: u64,
    },

    /// Email delivery failed; always handled internally
    #[error("Notification error: {message}")]
    Notification {
        /// Transport failure description
        message: String,
    },

    /// Settings file or environment could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// What could not be loaded
        message: String,
    },

    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed environment variable
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

fn variant_suffix(variant_id: &Option<i64>) -> String {
    variant_id.map_or_else(String::new, |id| format!(" (variant {id})"))
}

impl Error {
    /// Returns true for validation and business-rule failures whose message
    /// can be shown to the person who made the request.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            Self::Notification { .. }
                | Self::Config { .. }
                | Self::Database(_)
                | Self::Io(_)
                | Self::EnvVar(_)
        )
    }

    /// Message suitable for an end user. Infrastructure failures are
    /// reported generically; the detail belongs in the server log.
    #[must_use]
    pub fn user_message(&self) -> String {
        if self.is_user_facing() {
            self.to_string()
        } else {
            "Something went wrong on our side. Please try again later.".to_string()
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_errors_are_user_facing() {
        let err = Error::DuplicateActiveReservation {
            code: "RES-ABCD1234".to_string(),
        };
        assert!(err.is_user_facing());
        assert!(err.user_message().contains("RES-ABCD1234"));
    }

    #[test]
    fn test_infrastructure_errors_are_generic() {
        let err = Error::Database(sea_orm::DbErr::Custom("disk I/O error".to_string()));
        assert!(!err.is_user_facing());
        assert!(!err.user_message().contains("disk"));
    }

    #[test]
    fn test_stock_error_mentions_variant() {
        let err = Error::InsufficientStock {
            item_id: 3,
            variant_id: Some(9),
            requested: 2,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for item 3 (variant 9): requested 2, available 1"
        );
    }
}
