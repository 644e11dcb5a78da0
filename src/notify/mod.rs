//! Student notifications - Emails sent when a reservation is created,
//! canceled, or becomes claimable.
//!
//! Delivery is best effort. [`deliver`] bounds every send with a timeout and
//! logs failures; callers never see a notification error, and a reservation
//! that was committed stays committed whatever the mail server does.

pub mod console;
pub mod smtp;

use crate::errors::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{fmt, time::Duration};
use tracing::{debug, warn};

pub use console::LogNotifier;
pub use smtp::SmtpNotifier;

/// One reserved line as shown to the student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeLine {
    /// Item name
    pub product_name: String,
    /// Variant size label, if the line names a variant
    pub variant_name: Option<String>,
    /// Units reserved
    pub quantity: i32,
}

/// Everything a reservation email needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationNotice {
    /// Reservation code
    pub code: String,
    /// Student's full name
    pub student_name: String,
    /// Reserved lines
    pub items: Vec<NoticeLine>,
    /// The deadline relevant to the event: the cancel window for a new
    /// reservation, the claim deadline for a claim-ready notice
    pub deadline: Option<DateTime<Utc>>,
}

impl ReservationNotice {
    /// Plain-text list of the reserved lines, one per row.
    #[must_use]
    pub fn item_summary(&self) -> String {
        self.items
            .iter()
            .map(|line| match &line.variant_name {
                Some(size) => format!("- {} ({size}) x{}", line.product_name, line.quantity),
                None => format!("- {} x{}", line.product_name, line.quantity),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Which reservation event a notice announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Reservation accepted
    Created,
    /// Reservation canceled
    Canceled,
    /// Cancellation window closed, items can be picked up
    ClaimReady,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "reservation_created",
            Self::Canceled => "reservation_canceled",
            Self::ClaimReady => "claim_ready",
        })
    }
}

/// Outbound channel for reservation emails.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Confirms a new reservation.
    ///
    /// # Errors
    /// Returns `Error::Notification` if the message could not be sent.
    async fn send_reservation_created(&self, to: &str, notice: &ReservationNotice) -> Result<()>;

    /// Confirms a cancellation.
    ///
    /// # Errors
    /// Returns `Error::Notification` if the message could not be sent.
    async fn send_reservation_canceled(&self, to: &str, notice: &ReservationNotice)
    -> Result<()>;

    /// Tells the student the items are ready for pickup.
    ///
    /// # Errors
    /// Returns `Error::Notification` if the message could not be sent.
    async fn send_claim_ready(&self, to: &str, notice: &ReservationNotice) -> Result<()>;
}

/// Sends one notice, waiting at most `timeout`. Returns true when the
/// notifier reported success. Failures and timeouts are logged, never returned.
pub async fn deliver(
    notifier: &dyn Notifier,
    kind: NoticeKind,
    to: &str,
    notice: &ReservationNotice,
    timeout: Duration,
) -> bool {
    let send = async {
        match kind {
            NoticeKind::Created => notifier.send_reservation_created(to, notice).await,
            NoticeKind::Canceled => notifier.send_reservation_canceled(to, notice).await,
            NoticeKind::ClaimReady => notifier.send_claim_ready(to, notice).await,
        }
    };

    match tokio::time::timeout(timeout, send).await {
        Ok(Ok(())) => {
            debug!(%kind, code = %notice.code, "Notification sent");
            true
        }
        Ok(Err(e)) => {
            warn!(%kind, code = %notice.code, error = %e, "Notification failed");
            false
        }
        Err(_) => {
            warn!(%kind, code = %notice.code, timeout_ms = timeout.as_millis(), "Notification timed out");
            false
        }
    }
}

/// Shorthand for a transport failure.
pub(crate) fn notification_error(message: impl Into<String>) -> Error {
    Error::Notification {
        message: message.into(),
    }
}
