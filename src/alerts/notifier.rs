//! Notification channels
//!
//! A [`Notifier`] delivers one text to one opaque recipient. Delivery is
//! best-effort: callers log failures and move on.

/// Delivery channel for alert text
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Send `text` to `recipient`
    async fn send(&self, recipient: &str, text: &str) -> Result<(), NotifyError>;

    /// Human-readable channel name (e.g. "telegram", "log")
    fn channel_name(&self) -> &str;
}

/// Writes alerts to the tracing log instead of a chat
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), NotifyError> {
        tracing::warn!(recipient = %recipient, "Alert: {}", text);
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}
