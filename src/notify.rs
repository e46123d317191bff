//! Where confirmed bookings go.
//!
//! Notifiers are fire-and-forget from the user's point of view: a failed
//! delivery is logged and never changes the reply the user sees.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::booking::BookingRecord;
use crate::config::BookingEmailConfig;
use crate::error::NotifyError;

/// Receives every confirmed booking exactly once.
#[async_trait]
pub trait BookingNotifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, record: &BookingRecord) -> Result<(), NotifyError>;
}

/// Plain-text rendering used by the admin chat and email notifiers.
pub fn format_booking(record: &BookingRecord) -> String {
    format!(
        "🆕 New trial lesson booking\n\n\
         📚 Course: {}\n\
         🕐 Time: {}\n\
         👤 Name: {}\n\
         📧 Email: {}\n\
         📱 Phone: {}\n\n\
         User: {}\n\
         Booking: {}\n\
         Confirmed: {}",
        record.course.title,
        record.slot.title,
        record.name,
        record.email,
        record.phone.as_deref().unwrap_or("not provided"),
        record.user_id,
        record.id,
        record.confirmed_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

/// Logs the booking.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl BookingNotifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, record: &BookingRecord) -> Result<(), NotifyError> {
        info!(
            booking_id = %record.id,
            user_id = %record.user_id,
            course = %record.course.title,
            slot = %record.slot.title,
            "Booking confirmed"
        );
        Ok(())
    }
}

/// Forwards bookings to an in-process receiver (admin chat relay, tests).
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<BookingRecord>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BookingRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl BookingNotifier for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    async fn notify(&self, record: &BookingRecord) -> Result<(), NotifyError> {
        self.tx
            .send(record.clone())
            .map_err(|_| NotifyError::delivery("channel", "receiver dropped"))
    }
}

/// Emails the school's mailbox over SMTP.
pub struct EmailNotifier {
    config: BookingEmailConfig,
}

impl EmailNotifier {
    pub fn new(config: BookingEmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, record: &BookingRecord) -> Result<Message, NotifyError> {
        Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| NotifyError::delivery("email", format!("Invalid from address: {e}")))?,
            )
            .to(self
                .config
                .to_address
                .parse()
                .map_err(|e| NotifyError::delivery("email", format!("Invalid to address: {e}")))?)
            .subject(format!("Trial lesson booking: {}", record.name))
            .body(format_booking(record))
            .map_err(|e| NotifyError::delivery("email", format!("Failed to build email: {e}")))
    }

    fn transport(&self) -> Result<SmtpTransport, NotifyError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        Ok(SmtpTransport::relay(&self.config.smtp_host)
            .map_err(|e| NotifyError::delivery("email", format!("SMTP relay error: {e}")))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build())
    }
}

#[async_trait]
impl BookingNotifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    /// Builds the message, then sends it on a blocking task without waiting.
    async fn notify(&self, record: &BookingRecord) -> Result<(), NotifyError> {
        let email = self.build_message(record)?;
        let transport = self.transport()?;
        let booking_id = record.id;
        let to = self.config.to_address.clone();

        tokio::task::spawn_blocking(move || match transport.send(&email) {
            Ok(_) => info!(%booking_id, %to, "Booking email sent"),
            Err(e) => warn!(%booking_id, error = %e, "Booking email failed"),
        });
        Ok(())
    }
}

/// Delivers to several notifiers, continuing past failures.
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn BookingNotifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn BookingNotifier>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl BookingNotifier for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    /// Returns the first failure after every sink has been tried.
    async fn notify(&self, record: &BookingRecord) -> Result<(), NotifyError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(record).await {
                warn!(sink = sink.name(), error = %e, "Booking notification failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
