//! Console notifier for development and for deployments without SMTP.

use super::{Notifier, ReservationNotice};
use crate::errors::Result;
use async_trait::async_trait;
use tracing::info;

/// Writes every notice to the log instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
    /// Create a new console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_reservation_created(&self, to: &str, notice: &ReservationNotice) -> Result<()> {
        info!(
            to = %to,
            code = %notice.code,
            student = %notice.student_name,
            cancel_until = ?notice.deadline,
            items = %notice.item_summary(),
            "Reservation created email (console)"
        );
        Ok(())
    }

    async fn send_reservation_canceled(
        &self,
        to: &str,
        notice: &ReservationNotice,
    ) -> Result<()> {
        info!(
            to = %to,
            code = %notice.code,
            student = %notice.student_name,
            "Reservation canceled email (console)"
        );
        Ok(())
    }

    async fn send_claim_ready(&self, to: &str, notice: &ReservationNotice) -> Result<()> {
        info!(
            to = %to,
            code = %notice.code,
            student = %notice.student_name,
            claim_by = ?notice.deadline,
            items = %notice.item_summary(),
            "Claim ready email (console)"
        );
        Ok(())
    }
}
