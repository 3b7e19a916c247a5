//! # Service Layer
//!
//! Business logic, one service per subsystem. Transports (REST and
//! gRPC) marshal into these and never touch repositories directly.
//!
//! ```text
//! Transport ─► Policy Gate ─► AuthService (orchestrator)
//!                                │
//!                ┌───────────────┼────────────────────┐
//!                ▼               ▼                    ▼
//!         IdentityService  SessionService        OtpService
//!                │               │
//!                └───────┬───────┘
//!                        ▼
//!                 WebhookService (async fan-out)
//!
//! OauthLoginService / OidcProviderService / SamlService sit beside the
//! orchestrator and reuse the same session + identity engines.
//! ```

pub mod auth_service;
pub mod device;
pub mod identity_service;
pub mod notifier;
pub mod oauth_login_service;
pub mod oidc_provider_service;
pub mod otp_service;
pub mod saml_service;
pub mod session_service;
pub mod webhook_service;

pub use auth_service::{AuthService, SigninResult};
pub use identity_service::IdentityService;
pub use oauth_login_service::OauthLoginService;
pub use oidc_provider_service::OidcProviderService;
pub use otp_service::{OtpService, OtpTarget};
pub use saml_service::SamlService;
pub use session_service::{AuthOutcome, ClientContext, SessionService};
pub use webhook_service::WebhookService;
