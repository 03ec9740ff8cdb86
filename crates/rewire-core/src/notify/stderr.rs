//! Dev-mode notifier that writes messages to stderr.
//!
//! Selected when no SMTP host or webhook URL is configured, so a local
//! deployment still shows exactly what would have been sent.

use super::{Message, Notifier, NotifyError};

/// Prints every message to stderr instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrNotifier;

#[async_trait::async_trait]
impl Notifier for StderrNotifier {
    async fn deliver(&self, destination: &str, message: &Message) -> Result<(), NotifyError> {
        eprintln!(
            "--- NOTIFY to={destination}\nSUBJ: {}\n\n{}\n---",
            message.subject, message.body
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "stderr"
    }
}
