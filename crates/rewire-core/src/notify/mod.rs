//! Notification port and channel implementations.
//!
//! The reconciler talks to a single [`Notifier`] abstraction; where the
//! message actually goes (SMTP, webhook, stderr) is a deployment decision.
//! Delivery failures are reported to the caller and otherwise have no effect
//! on the violation ledger - the reconciler retries on its own schedule.

mod email;
mod stderr;
mod webhook;

pub use email::{EmailNotifier, SmtpSettings};
pub use stderr::StderrNotifier;
pub use webhook::WebhookNotifier;

use thiserror::Error;

/// Errors that can occur during notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned {status}")]
    Status { status: u16 },

    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("invalid destination address: {0}")]
    Address(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Message {
    /// Subject line (email) or title.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Structured payload; webhook channels deliver exactly this document.
    pub payload: serde_json::Value,
}

/// Trait for notification channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message to `destination` through this channel.
    ///
    /// `destination` is the expectation's opaque `owner_contact`; channels
    /// that are configured with a fixed endpoint (webhooks) may ignore it.
    async fn deliver(&self, destination: &str, message: &Message) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "email", "webhook").
    fn channel_name(&self) -> &str;
}

/// Fan-out over every configured channel.
///
/// Delivery is all-or-nothing from the caller's point of view: if any channel
/// fails, the whole attempt counts as failed so the reconciler leaves
/// `last_notified_at` untouched and retries next interval. A duplicate on the
/// healthy channel is the acceptable cost of never losing an alert silently.
pub struct NotifierStack {
    channels: Vec<Box<dyn Notifier>>,
}

impl NotifierStack {
    #[must_use]
    pub fn new(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Deliver `message` on every channel, logging per-channel outcomes.
    ///
    /// # Errors
    ///
    /// Returns the first [`NotifyError`] encountered after attempting every
    /// channel.
    pub async fn deliver(&self, destination: &str, message: &Message) -> Result<(), NotifyError> {
        let mut first_err = None;
        for channel in &self.channels {
            match channel.deliver(destination, message).await {
                Ok(()) => {
                    tracing::debug!(
                        channel = channel.channel_name(),
                        subject = %message.subject,
                        "notification delivered"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        channel = channel.channel_name(),
                        subject = %message.subject,
                        error = %e,
                        "notification delivery failed"
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct FlakyNotifier {
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Notifier for FlakyNotifier {
        async fn deliver(&self, _dest: &str, message: &Message) -> Result<(), NotifyError> {
            self.log.lock().unwrap().push(message.subject.clone());
            if self.fail {
                Err(NotifyError::Smtp("connection refused".into()))
            } else {
                Ok(())
            }
        }

        fn channel_name(&self) -> &str {
            "flaky"
        }
    }

    fn message() -> Message {
        Message {
            subject: "[rewire] VIOLATION missed: nightly".into(),
            body: "details".into(),
            payload: serde_json::json!({"code": "missed"}),
        }
    }

    #[tokio::test]
    async fn test_stack_attempts_every_channel_despite_failure() {
        let healthy_log = Arc::new(Mutex::new(Vec::new()));
        let stack = NotifierStack::new(vec![
            Box::new(FlakyNotifier {
                fail: true,
                log: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(FlakyNotifier {
                fail: false,
                log: Arc::clone(&healthy_log),
            }),
        ]);

        let result = stack.deliver("ops@example.com", &message()).await;

        assert!(result.is_err());
        // The healthy channel still got the message.
        assert_eq!(healthy_log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stack_all_healthy_is_ok() {
        let stack = NotifierStack::new(vec![
            Box::new(FlakyNotifier {
                fail: false,
                log: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(FlakyNotifier {
                fail: false,
                log: Arc::new(Mutex::new(Vec::new())),
            }),
        ]);
        assert!(stack.deliver("ops@example.com", &message()).await.is_ok());
    }
}
