//! Outbound Notification Seam
//!
//! Abstract interface for delivering notice messages to recipients.
//! Delivery is fire-and-forget from the workflow's point of view: failures
//! are logged and never fail the state transition that triggered them.

use async_trait::async_trait;
use thiserror::Error;

use crate::distribution::Recipient;

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Rendered message handed to the delivery channel.
#[derive(Debug, Clone)]
pub struct NoticeMessage {
    pub subject: String,
    pub body: String,
}

/// Delivery channel for notice messages (email, webhook, …).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &Recipient, message: &NoticeMessage)
        -> Result<(), NotifyError>;
}

/// Logs deliveries instead of sending them. Useful for tests and local
/// development.
#[derive(Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(
        &self,
        recipient: &Recipient,
        message: &NoticeMessage,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %recipient.name,
            address = %recipient.address,
            subject = %message.subject,
            "notice delivery (logging only)"
        );
        Ok(())
    }
}
