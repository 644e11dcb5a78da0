//! Request and response shapes for the reservation endpoints.
//!
//! The engine speaks in typed operations and `Error`; this layer turns JSON
//! bodies into engine calls and engine results back into JSON bodies. It
//! owns no transport: any HTTP framework can call these handlers.

use crate::{
    core::{
        context::StoreContext,
        ledger::StockLine,
        reservation::{self, NewReservation, ReservationDetails},
    },
    entities::ReservationStatus,
    errors::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// One requested line.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationLineRequest {
    /// Item to reserve
    pub item_id: i64,
    /// Variant to reserve instead of the item itself
    #[serde(default)]
    pub variant_id: Option<i64>,
    /// Units
    pub quantity: i32,
}

/// Body of a reservation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    /// Full name
    pub student_name: String,
    /// Contact address
    #[serde(default)]
    pub student_email: Option<String>,
    /// School id number
    #[serde(default)]
    pub student_number: Option<String>,
    /// Requested lines
    #[serde(default)]
    pub lines: Vec<ReservationLineRequest>,
}

/// Reply to a successful reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationResponse {
    /// Database id of the reservation
    pub reservation_id: i64,
    /// Code to quote when claiming or canceling
    pub code: String,
}

/// Body of a cancellation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReservationRequest {
    /// Reservation code
    pub code: String,
    /// Whether staff is canceling; bypasses the cancellation window
    #[serde(default)]
    pub is_admin: bool,
}

/// Reply to a successful command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SuccessResponse {
    /// Always true
    pub success: bool,
}

/// A reserved line as shown to the student.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationLineView {
    /// Item id
    pub item_id: i64,
    /// Item name
    pub item_name: String,
    /// Variant size, if any
    pub variant_size: Option<String>,
    /// Units
    pub quantity: i32,
    /// Current unit price
    pub unit_price: f64,
}

/// A reservation as shown to the student.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    /// Reservation code
    pub code: String,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// Holder's name
    pub student_name: String,
    /// End of the self-service cancellation window
    pub cancel_window_expires: DateTime<Utc>,
    /// Pickup deadline
    pub claim_deadline: Option<DateTime<Utc>>,
    /// Reserved lines
    pub items: Vec<ReservationLineView>,
    /// Sum of the lines at current prices
    pub total: f64,
}

impl From<ReservationDetails> for ReservationView {
    fn from(details: ReservationDetails) -> Self {
        let total = details.total();
        Self {
            code: details.reservation.code,
            status: details.reservation.status,
            student_name: details.student.full_name,
            cancel_window_expires: details.reservation.cancel_window_expires,
            claim_deadline: details.reservation.claim_deadline,
            items: details
                .lines
                .into_iter()
                .map(|l| ReservationLineView {
                    item_id: l.line.item_id,
                    item_name: l.item_name,
                    variant_size: l.variant_size,
                    quantity: l.line.quantity,
                    unit_price: l.unit_price,
                })
                .collect(),
            total,
        }
    }
}

/// Reply to a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Message safe to show to the requester
    pub error: String,
    /// Code of the reservation the student already holds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// HTTP status a transport should answer with
    #[serde(skip)]
    pub status: u16,
}

impl From<Error> for ErrorResponse {
    fn from(err: Error) -> Self {
        if !err.is_user_facing() {
            error!(error = %err, "Request failed");
        }
        let code = match &err {
            Error::DuplicateActiveReservation { code } => Some(code.clone()),
            _ => None,
        };
        Self {
            error: err.user_message(),
            code,
            status: status_for(&err),
        }
    }
}

/// HTTP status for an engine error.
#[must_use]
pub const fn status_for(err: &Error) -> u16 {
    match err {
        Error::Validation { .. } => 400,
        Error::WindowExpired { .. } => 403,
        Error::ReservationNotFound { .. }
        | Error::ItemNotFound { .. }
        | Error::VariantNotFound { .. }
        | Error::StudentNotFound { .. }
        | Error::PaymentNotFound { .. } => 404,
        Error::InsufficientStock { .. }
        | Error::ReservationFloorViolation { .. }
        | Error::DuplicateActiveReservation { .. }
        | Error::InvalidTransition { .. }
        | Error::PaymentAlreadySettled { .. }
        | Error::AlreadyReleased { .. }
        | Error::ItemUnavailable { .. }
        | Error::DeleteBlocked { .. } => 409,
        Error::Notification { .. }
        | Error::Config { .. }
        | Error::Database(_)
        | Error::Io(_)
        | Error::EnvVar(_) => 500,
    }
}

/// Result type of every handler.
pub type ApiResult<T> = std::result::Result<T, ErrorResponse>;

/// Handles a reservation request.
pub async fn create_reservation(
    ctx: &StoreContext,
    request: CreateReservationRequest,
) -> ApiResult<CreateReservationResponse> {
    let new = NewReservation {
        student_name: request.student_name,
        student_email: request.student_email,
        student_number: request.student_number,
        lines: request
            .lines
            .into_iter()
            .map(|l| StockLine {
                item_id: l.item_id,
                variant_id: l.variant_id,
                quantity: l.quantity,
            })
            .collect(),
    };
    let created = reservation::create_reservation(ctx, new).await?;
    Ok(CreateReservationResponse {
        reservation_id: created.id,
        code: created.code,
    })
}

/// Handles a cancellation request.
pub async fn cancel_reservation(
    ctx: &StoreContext,
    request: CancelReservationRequest,
) -> ApiResult<SuccessResponse> {
    reservation::cancel_reservation(ctx, &request.code, request.is_admin).await?;
    Ok(SuccessResponse { success: true })
}

/// Looks up a reservation by code.
pub async fn get_reservation(ctx: &StoreContext, code: &str) -> ApiResult<ReservationView> {
    Ok(reservation::get_reservation(ctx, code).await?.into())
}
