//! # Repository Layer
//!
//! Thin query layers over PostgreSQL, one per aggregate. Repositories
//! return plain domain value types and never contain business rules;
//! single-use and uniqueness guarantees they do enforce are conditional
//! updates the services rely on.
//!
//! | Repository | Aggregate |
//! |------------|-----------|
//! | [`UserRepository`] | users, password history, app profiles |
//! | [`ApplicationRepository`] | applications, API keys, IP filters |
//! | [`SessionRepository`] | sessions (refresh rows) |
//! | [`RoleRepository`] | roles, permissions, assignments |
//! | [`OtpRepository`] | one-time codes |
//! | [`OAuthRepository`] | OAuth clients/codes/tokens/consents/device grants |
//! | [`SsoRepository`] | exchange codes, SAML service providers |
//! | [`WebhookRepository`] | webhook registrations + delivery queue |
//! | [`AuditRepository`] | append-only audit trail |

pub mod application_repository;
pub mod audit_repository;
pub mod oauth_repository;
pub mod otp_repository;
pub mod role_repository;
pub mod session_repository;
pub mod sso_repository;
pub mod user_repository;
pub mod webhook_repository;

pub use application_repository::ApplicationRepository;
pub use audit_repository::{AuditRecord, AuditRepository};
pub use oauth_repository::OAuthRepository;
pub use otp_repository::OtpRepository;
pub use role_repository::RoleRepository;
pub use session_repository::{SessionClient, SessionRepository};
pub use sso_repository::SsoRepository;
pub use user_repository::UserRepository;
pub use webhook_repository::WebhookRepository;
