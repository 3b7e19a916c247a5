//! # Webhook Events
//!
//! Change events the IdP publishes so products can maintain read-only
//! shadow-user projections.
//!
//! ## Event Flow
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────────┐
//! │  Orchestrator   │────▶│   Event Bus     │────▶│  Product backends   │
//! │  (produces)     │     │  (queue+retry)  │     │  (shadow tables)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────────┘
//! ```
//!
//! ## Available Events
//!
//! | Event                 | Trigger                                  |
//! |-----------------------|------------------------------------------|
//! | `user.created`        | New user registered (any flow)           |
//! | `user.updated`        | Profile-relevant user fields changed     |
//! | `user.deactivated`    | `is_active` flipped to false             |
//! | `user.deleted`        | Soft delete                              |
//! | `profile.updated`     | Per-application profile changed          |
//! | `user.login`          | Successful authentication                |
//! | `user.login_alert`    | First sighting of a device fingerprint   |
//! | `password.changed`    | Password set/reset/changed               |
//! | `two_factor.enabled`  | TOTP enrolled                            |
//! | `two_factor.disabled` | TOTP removed                             |
//!
//! ## Wire Format
//!
//! Every delivery POSTs the envelope
//! `{event, timestamp, application_id, payload}` with an
//! `X-Webhook-Signature` header: hex HMAC-SHA256 over the exact body
//! bytes using the webhook's secret. Products missing webhooks can catch
//! up with the `SyncUsers(updated_after)` pull.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// EVENT ENVELOPE
// =============================================================================

/// The signed body delivered to webhook endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event name, e.g. `user.created`
    pub event: String,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Application scope; `None` for global user events fanned out to
    /// every application the user has a profile in
    pub application_id: Option<Uuid>,
    /// Event-specific payload
    pub payload: serde_json::Value,
}

// =============================================================================
// EVENTS
// =============================================================================

/// All events the IdP publishes.
///
/// The enum is the single source of event names; everything else
/// (subscription matching, envelope building) goes through
/// [`WebhookEvent::event_type`] and [`WebhookEvent::into_envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WebhookEvent {
    UserCreated {
        user_id: Uuid,
        email: Option<String>,
        phone: Option<String>,
        username: String,
    },
    UserUpdated {
        user_id: Uuid,
        email: Option<String>,
        phone: Option<String>,
        username: String,
        is_active: bool,
    },
    UserDeactivated {
        user_id: Uuid,
    },
    UserDeleted {
        user_id: Uuid,
    },
    ProfileUpdated {
        user_id: Uuid,
        application_id: Uuid,
        app_roles: Vec<String>,
        is_banned: bool,
    },
    UserLogin {
        user_id: Uuid,
        application_id: Option<Uuid>,
        method: String,
        ip_address: Option<String>,
    },
    UserLoginAlert {
        user_id: Uuid,
        application_id: Option<Uuid>,
        device_type: Option<String>,
        device_os: Option<String>,
        device_browser: Option<String>,
        ip_address: Option<String>,
    },
    PasswordChanged {
        user_id: Uuid,
    },
    TwoFactorEnabled {
        user_id: Uuid,
    },
    TwoFactorDisabled {
        user_id: Uuid,
    },
}

impl WebhookEvent {
    /// The wire event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserCreated { .. } => "user.created",
            Self::UserUpdated { .. } => "user.updated",
            Self::UserDeactivated { .. } => "user.deactivated",
            Self::UserDeleted { .. } => "user.deleted",
            Self::ProfileUpdated { .. } => "profile.updated",
            Self::UserLogin { .. } => "user.login",
            Self::UserLoginAlert { .. } => "user.login_alert",
            Self::PasswordChanged { .. } => "password.changed",
            Self::TwoFactorEnabled { .. } => "two_factor.enabled",
            Self::TwoFactorDisabled { .. } => "two_factor.disabled",
        }
    }

    /// The user this event concerns.
    pub fn user_id(&self) -> Uuid {
        match self {
            Self::UserCreated { user_id, .. }
            | Self::UserUpdated { user_id, .. }
            | Self::UserDeactivated { user_id }
            | Self::UserDeleted { user_id }
            | Self::ProfileUpdated { user_id, .. }
            | Self::UserLogin { user_id, .. }
            | Self::UserLoginAlert { user_id, .. }
            | Self::PasswordChanged { user_id }
            | Self::TwoFactorEnabled { user_id }
            | Self::TwoFactorDisabled { user_id } => *user_id,
        }
    }

    /// Application scope for subscription fan-out, when the event has one.
    pub fn application_id(&self) -> Option<Uuid> {
        match self {
            Self::ProfileUpdated { application_id, .. } => Some(*application_id),
            Self::UserLogin { application_id, .. }
            | Self::UserLoginAlert { application_id, .. } => *application_id,
            _ => None,
        }
    }

    /// Builds the wire envelope, stamping the current time.
    pub fn into_envelope(self) -> EventEnvelope {
        let event = self.event_type().to_string();
        let application_id = self.application_id();
        let payload = serde_json::to_value(&self).unwrap_or_default();

        EventEnvelope {
            event,
            timestamp: Utc::now(),
            application_id,
            payload,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_stable() {
        let id = Uuid::new_v4();
        assert_eq!(
            WebhookEvent::UserCreated {
                user_id: id,
                email: None,
                phone: None,
                username: "u".into()
            }
            .event_type(),
            "user.created"
        );
        assert_eq!(
            WebhookEvent::UserDeleted { user_id: id }.event_type(),
            "user.deleted"
        );
        assert_eq!(
            WebhookEvent::TwoFactorEnabled { user_id: id }.event_type(),
            "two_factor.enabled"
        );
    }

    #[test]
    fn test_envelope_carries_application_scope() {
        let app = Uuid::new_v4();
        let envelope = WebhookEvent::ProfileUpdated {
            user_id: Uuid::new_v4(),
            application_id: app,
            app_roles: vec!["member".into()],
            is_banned: false,
        }
        .into_envelope();

        assert_eq!(envelope.event, "profile.updated");
        assert_eq!(envelope.application_id, Some(app));
        assert!(envelope.payload.is_object());
    }

    #[test]
    fn test_global_events_have_no_application() {
        let envelope = WebhookEvent::PasswordChanged {
            user_id: Uuid::new_v4(),
        }
        .into_envelope();
        assert_eq!(envelope.application_id, None);
    }
}
