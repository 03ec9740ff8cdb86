//! SMTP email notifier via `lettre` with STARTTLS.
//!
//! The destination mailbox comes from the expectation's `owner_contact`, so
//! one transport serves every expectation.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as EmailMessage, Tokio1Executor};

use super::{Message, Notifier, NotifyError};

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Username/password pair; `None` leaves the connection unauthenticated.
    pub credentials: Option<(String, String)>,
    /// Sender address, e.g. `"rewire@example.com"`.
    pub from: String,
}

/// Sends notifications as email via SMTP.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    /// Build an `EmailNotifier` from SMTP settings.
    ///
    /// Port 465 and the default 587 both go through the STARTTLS relay
    /// builder; lettre upgrades the connection before authentication.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Config`] when the relay host or the sender
    /// address cannot be parsed.
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| NotifyError::Config(e.to_string()))?
            .port(settings.port);

        if let Some((user, password)) = &settings.credentials {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn deliver(&self, destination: &str, message: &Message) -> Result<(), NotifyError> {
        let to: Mailbox = destination
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Address(e.to_string()))?;

        let email = EmailMessage::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .body(message.body.clone())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            credentials: None,
            from: "rewire@example.com".into(),
        }
    }

    #[tokio::test]
    async fn test_from_settings_valid() {
        assert!(EmailNotifier::from_settings(&settings()).is_ok());
    }

    #[tokio::test]
    async fn test_from_settings_bad_sender() {
        let result = EmailNotifier::from_settings(&SmtpSettings {
            from: "not-an-address".into(),
            ..settings()
        });
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }

    #[tokio::test]
    async fn test_bad_destination_is_an_address_error() {
        let notifier = EmailNotifier::from_settings(&settings()).unwrap();
        let message = Message {
            subject: "s".into(),
            body: "b".into(),
            payload: serde_json::Value::Null,
        };
        let result = notifier.deliver("definitely not an email", &message).await;
        assert!(matches!(result, Err(NotifyError::Address(_))));
    }

    #[tokio::test]
    async fn test_channel_name() {
        let notifier = EmailNotifier::from_settings(&settings()).unwrap();
        assert_eq!(notifier.channel_name(), "email");
    }
}
