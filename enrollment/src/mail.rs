//! Outgoing mail.
//!
//! Mail is fire-and-forget from the core's point of view: callers log a
//! failed send and move on, nothing is retried and nothing is rolled back.

use thiserror::Error;
use tracing::info;

/// A rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Recipient address
    pub to: String,
    /// Sender address
    pub from: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Mail delivery failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// Address could not be parsed
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress {
        /// Offending address
        address: String,
        /// Parser message
        reason: String,
    },

    /// Transport refused or failed to deliver
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Mail transport
pub trait MailSender: Send + Sync {
    /// Deliver one message
    ///
    /// # Errors
    ///
    /// Returns [`MailError`] if the message could not be handed to the transport.
    fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Writes mails to the log instead of delivering them
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleMailSender;

impl MailSender for ConsoleMailSender {
    fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(
            to = %message.to,
            from = %message.from,
            subject = %message.subject,
            "\n{}",
            message.body
        );
        Ok(())
    }
}

#[cfg(feature = "smtp")]
pub use smtp::SmtpMailSender;

#[cfg(feature = "smtp")]
mod smtp {
    use super::{MailError, MailMessage, MailSender};
    use lettre::message::header::ContentType;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{Message, SmtpTransport, Transport};

    /// SMTP delivery through a relay using Lettre
    #[derive(Clone)]
    pub struct SmtpMailSender {
        transport: SmtpTransport,
    }

    impl SmtpMailSender {
        /// Build a sender for `host:port` authenticating with `username`/`password`
        ///
        /// # Errors
        ///
        /// Returns [`MailError::Delivery`] if the relay cannot be configured.
        pub fn new(
            host: &str,
            port: u16,
            username: String,
            password: String,
        ) -> Result<Self, MailError> {
            let transport = SmtpTransport::relay(host)
                .map_err(|e| MailError::Delivery(format!("SMTP relay error: {e}")))?
                .port(port)
                .credentials(Credentials::new(username, password))
                .build();
            Ok(Self { transport })
        }
    }

    impl MailSender for SmtpMailSender {
        fn send(&self, message: &MailMessage) -> Result<(), MailError> {
            let email = Message::builder()
                .from(message.from.parse().map_err(|e| MailError::InvalidAddress {
                    address: message.from.clone(),
                    reason: format!("{e}"),
                })?)
                .to(message.to.parse().map_err(|e| MailError::InvalidAddress {
                    address: message.to.clone(),
                    reason: format!("{e}"),
                })?)
                .subject(message.subject.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(message.body.clone())
                .map_err(|e| MailError::Delivery(format!("Failed to build email: {e}")))?;

            self.transport
                .send(&email)
                .map(|_| ())
                .map_err(|e| MailError::Delivery(format!("Failed to send email: {e}")))
        }
    }
}
