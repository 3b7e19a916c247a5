//! # Delivery Capabilities
//!
//! Email and SMS sending behind capability traits. Concrete provider
//! drivers (SMTP relays, SMS gateways) are external collaborators; the
//! IdP depends only on these interfaces and selects an implementation at
//! startup - no global registries, no mutable singletons.
//!
//! The default [`DevLogNotifier`] writes messages to the log, which is
//! also how OTP codes are captured in development and test environments.

use async_trait::async_trait;
use shared::errors::ApiError;

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// Sends transactional email.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Delivers one message. Implementations map transport failures to
    /// `ApiError::ProviderUnavailable`.
    async fn send_email(&self, to: &str, subject: &str, body_html: &str) -> Result<(), ApiError>;
}

/// Sends SMS messages.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), ApiError>;
}

// =============================================================================
// DEV IMPLEMENTATION
// =============================================================================

/// Logs instead of sending. Used in development and as the fallback when
/// no provider is configured.
#[derive(Debug, Clone, Default)]
pub struct DevLogNotifier;

#[async_trait]
impl EmailSender for DevLogNotifier {
    async fn send_email(&self, to: &str, subject: &str, body_html: &str) -> Result<(), ApiError> {
        tracing::info!(
            to = %to,
            subject = %subject,
            body_len = body_html.len(),
            "Email delivery (dev log sink)"
        );
        Ok(())
    }
}

#[async_trait]
impl SmsSender for DevLogNotifier {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), ApiError> {
        tracing::info!(to = %to, body_len = body.len(), "SMS delivery (dev log sink)");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dev_notifier_accepts_everything() {
        let notifier = DevLogNotifier;
        assert!(notifier
            .send_email("u@x.com", "Your code", "<b>123456</b>")
            .await
            .is_ok());
        assert!(notifier.send_sms("+12025550123", "123456").await.is_ok());
    }
}
