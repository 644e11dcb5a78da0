//! SMTP notifier using Lettre.

use super::{Notifier, ReservationNotice, notification_error};
use crate::{config::EmailSettings, errors::Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::time::Duration;
use tracing::instrument;

/// Sends plain-text reservation emails through an SMTP relay (STARTTLS).
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Builds the relay transport from the email settings.
    ///
    /// # Errors
    /// Returns `Error::Notification` if no server is configured, the relay
    /// cannot be set up, or the sender address does not parse.
    pub fn from_settings(settings: &EmailSettings, password: Option<String>) -> Result<Self> {
        let server = settings
            .smtp_server
            .as_deref()
            .ok_or_else(|| notification_error("SMTP server is not configured"))?;
        let from = format!("{} <{}>", settings.from_name, settings.from_email)
            .parse::<Mailbox>()
            .map_err(|e| notification_error(format!("Invalid from address: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)
            .map_err(|e| notification_error(format!("SMTP relay error: {e}")))?
            .port(settings.smtp_port)
            .timeout(Some(Duration::from_secs(settings.timeout_secs)));
        if let (Some(username), Some(password)) = (settings.smtp_username.clone(), password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<()> {
        let to = to
            .parse::<Mailbox>()
            .map_err(|e| notification_error(format!("Invalid to address: {e}")))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| notification_error(format!("Failed to build email: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| notification_error(format!("Failed to send email: {e}")))?;
        Ok(())
    }
}

fn format_deadline(deadline: Option<DateTime<Utc>>) -> String {
    deadline.map_or_else(
        || "the posted deadline".to_string(),
        |d| d.format("%Y-%m-%d %H:%M UTC").to_string(),
    )
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[instrument(skip(self, notice), fields(code = %notice.code))]
    async fn send_reservation_created(&self, to: &str, notice: &ReservationNotice) -> Result<()> {
        let body = format!(
            "Hi {},\n\nYour reservation {} has been received:\n\n{}\n\n\
             You can still cancel it until {}. After that your items will be \
             held for pickup at the giftstore.\n",
            notice.student_name,
            notice.code,
            notice.item_summary(),
            format_deadline(notice.deadline),
        );
        self.send(to, &format!("Reservation {} received", notice.code), body)
            .await
    }

    #[instrument(skip(self, notice), fields(code = %notice.code))]
    async fn send_reservation_canceled(
        &self,
        to: &str,
        notice: &ReservationNotice,
    ) -> Result<()> {
        let body = format!(
            "Hi {},\n\nYour reservation {} has been canceled and the items \
             were returned to the shelf:\n\n{}\n",
            notice.student_name,
            notice.code,
            notice.item_summary(),
        );
        self.send(to, &format!("Reservation {} canceled", notice.code), body)
            .await
    }

    #[instrument(skip(self, notice), fields(code = %notice.code))]
    async fn send_claim_ready(&self, to: &str, notice: &ReservationNotice) -> Result<()> {
        let body = format!(
            "Hi {},\n\nYour reservation {} is ready for pickup:\n\n{}\n\n\
             Please claim and pay for it before {}, otherwise it will expire \
             and the items will be released.\n",
            notice.student_name,
            notice.code,
            notice.item_summary(),
            format_deadline(notice.deadline),
        );
        self.send(to, &format!("Reservation {} ready for pickup", notice.code), body)
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::errors::Error;
    use chrono::TimeZone;

    fn settings() -> EmailSettings {
        EmailSettings {
            smtp_server: Some("smtp.example.com".to_string()),
            smtp_port: 587,
            smtp_username: Some("store".to_string()),
            from_email: "giftstore@example.com".to_string(),
            from_name: "School Giftstore".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_requires_server() {
        let mut settings = settings();
        settings.smtp_server = None;
        let result = SmtpNotifier::from_settings(&settings, None);
        assert!(matches!(result, Err(Error::Notification { .. })));
    }

    #[test]
    fn test_rejects_bad_sender() {
        let mut settings = settings();
        settings.from_email = "not an address".to_string();
        let result = SmtpNotifier::from_settings(&settings, Some("secret".to_string()));
        assert!(matches!(result, Err(Error::Notification { .. })));
    }

    #[test]
    fn test_format_deadline() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(format_deadline(Some(at)), "2025-03-01 08:30 UTC");
        assert_eq!(format_deadline(None), "the posted deadline");
    }
}
