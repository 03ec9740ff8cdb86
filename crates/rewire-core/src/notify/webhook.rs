//! Generic HTTP webhook notifier.
//!
//! Posts the message's structured payload as JSON to one configured URL. The
//! per-expectation destination is carried inside the payload, never in the
//! request URL, so expectation ids do not leak into third-party access logs.

use std::time::Duration;

use super::{Message, Notifier, NotifyError};

/// Per-request deadline; a stuck endpoint must not stall the checker.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers notifications as JSON over HTTP POST to a configured endpoint.
#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a webhook notifier targeting `url`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Config`] when the HTTP client cannot be built.
    pub fn new(url: String) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(Self { url, client })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, _destination: &str, message: &Message) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&message.payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, %status, "webhook returned non-2xx status");
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_builds_client() {
        let notifier = WebhookNotifier::new("https://hooks.example.com/rewire".into()).unwrap();
        assert_eq!(notifier.channel_name(), "webhook");
    }
}
