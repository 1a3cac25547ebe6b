use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Outbound mail seam. Real delivery belongs to an external provider; the
/// server only ever treats it as best-effort.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), MailError>;
}

/// Default mailer: writes the message to the log instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), MailError> {
        tracing::info!(recipients = ?to, subject, body, "mail");
        Ok(())
    }
}
