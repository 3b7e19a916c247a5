//! # Identity Provider Domain Entities
//!
//! Persistent business objects mapping directly to database tables. The
//! IdP owns every table here exclusively; product databases hold only
//! user-id references and webhook-fed shadow projections.
//!
//! ## Entity Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Domain Entities                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────┐       ┌──────────────────────────┐                    │
//! │  │ Application  │◄──────│ UserApplicationProfile   │──────┐             │
//! │  └──────┬───────┘  N:1  └────────────┬─────────────┘  N:1 │             │
//! │         │                            │                    ▼             │
//! │         │ 1:N                        │              ┌──────────┐        │
//! │         ▼                            └─────────────►│   User   │        │
//! │  ┌──────────────┐                                   └────┬─────┘        │
//! │  │  ApiKey      │                                        │ 1:N          │
//! │  │  IpFilter    │                                        ▼              │
//! │  │  Webhook     │                                 ┌──────────────┐      │
//! │  │  OAuthClient │                                 │   Session    │      │
//! │  └──────────────┘                                 │   Otp        │      │
//! │                                                   │   UserRole   │      │
//! │                                                   └──────────────┘      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Considerations
//!
//! - **Nothing secret is stored in the clear**: application secrets, API
//!   keys, refresh tokens, OTP codes, authorization codes and exchange
//!   codes are all stored as hashes
//! - **Soft deletes**: `deleted_at` on users and applications; `revoked_at`
//!   on sessions is monotonic - it is set once and never cleared
//! - Use the `*View` types for API responses; entity types carry hashes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// AUTH METHODS
// =============================================================================

/// The closed set of authentication methods an application can allow.
///
/// Stored on the application row as a text array; the policy gate checks
/// the invoked flow against this whitelist before the orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    OtpEmail,
    OtpSms,
    OauthGoogle,
    OauthGithub,
    OauthYandex,
    OauthTelegram,
    Totp,
    ApiKey,
}

impl AuthMethod {
    /// Wire/storage name, e.g. `otp_email`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::OtpEmail => "otp_email",
            Self::OtpSms => "otp_sms",
            Self::OauthGoogle => "oauth_google",
            Self::OauthGithub => "oauth_github",
            Self::OauthYandex => "oauth_yandex",
            Self::OauthTelegram => "oauth_telegram",
            Self::Totp => "totp",
            Self::ApiKey => "api_key",
        }
    }

    /// Parses a storage name. Unknown names are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "password" => Some(Self::Password),
            "otp_email" => Some(Self::OtpEmail),
            "otp_sms" => Some(Self::OtpSms),
            "oauth_google" => Some(Self::OauthGoogle),
            "oauth_github" => Some(Self::OauthGithub),
            "oauth_yandex" => Some(Self::OauthYandex),
            "oauth_telegram" => Some(Self::OauthTelegram),
            "totp" => Some(Self::Totp),
            "api_key" => Some(Self::ApiKey),
            _ => None,
        }
    }

    /// Maps an OAuth provider slug (`google`, `github`, ...) to its
    /// auth method for the policy check.
    pub fn from_oauth_provider(provider: &str) -> Option<Self> {
        match provider {
            "google" => Some(Self::OauthGoogle),
            "github" => Some(Self::OauthGithub),
            "yandex" => Some(Self::OauthYandex),
            "telegram" => Some(Self::OauthTelegram),
            _ => None,
        }
    }
}

// =============================================================================
// APPLICATION
// =============================================================================

/// A tenant product registered with the IdP.
///
/// Carries its own auth policy (allowed methods, gRPC scopes), callback
/// URLs and branding. System applications cannot be deleted; a secret is
/// never recoverable, only rotated.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    /// Unique slug, e.g. `shop-backend`
    pub name: String,
    pub display_name: String,
    /// Subset of [`AuthMethod`] storage names
    pub allowed_auth_methods: Vec<String>,
    /// Subset of the closed gRPC scope set
    pub allowed_grpc_scopes: Vec<String>,
    pub callback_urls: Vec<String>,
    pub homepage_url: Option<String>,
    /// Free-form branding blob (logo URL, colors) for product UIs
    pub branding: Option<serde_json::Value>,
    /// SHA-256 of the `app_` secret; the secret itself is never stored
    pub secret_hash: String,
    /// First 8 chars of the secret, for display
    pub secret_prefix: String,
    pub secret_rotated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// System applications are protected from deletion
    pub is_system: bool,
    pub owner_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Application {
    /// Whether this application's policy allows the given method.
    pub fn allows_method(&self, method: AuthMethod) -> bool {
        self.allowed_auth_methods
            .iter()
            .any(|m| m == method.as_str())
    }

    /// Whether this application may grant the given gRPC scope to its
    /// API keys.
    pub fn allows_scope(&self, scope: &str) -> bool {
        self.allowed_grpc_scopes.iter().any(|s| s == scope)
    }
}

/// Public per-application auth configuration served to product frontends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfigView {
    pub application_id: Uuid,
    pub name: String,
    pub display_name: String,
    pub allowed_auth_methods: Vec<String>,
    pub homepage_url: Option<String>,
    pub branding: Option<serde_json::Value>,
}

impl From<Application> for AuthConfigView {
    fn from(app: Application) -> Self {
        Self {
            application_id: app.id,
            name: app.name,
            display_name: app.display_name,
            allowed_auth_methods: app.allowed_auth_methods,
            homepage_url: app.homepage_url,
            branding: app.branding,
        }
    }
}

// =============================================================================
// USER
// =============================================================================

/// Global identity, unified across all applications.
///
/// At least one of email/phone is present (enforced at the service
/// layer); email is stored normalized lowercase, phone in E.164.
/// The password hash is nullable - OTP-seeded and OAuth-seeded accounts
/// have none until the user sets one.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub username: String,
    /// Argon2id PHC string; algorithm identifier in the hash enables
    /// lazy rehash on login
    pub password_hash: Option<String>,
    /// Base32 TOTP secret when 2FA is enrolled
    pub totp_secret: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub password_expires_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether the account has TOTP 2FA enrolled.
    pub fn two_factor_enabled(&self) -> bool {
        self.totp_secret.is_some()
    }
}

/// Data required to create a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub username: String,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
}

/// Public user data, safe for API responses (no hashes, no secrets).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub username: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub two_factor_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            phone: user.phone,
            username: user.username,
            is_active: user.is_active,
            email_verified: user.email_verified,
            phone_verified: user.phone_verified,
            two_factor_enabled: user.totp_secret.is_some(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

// =============================================================================
// USER APPLICATION PROFILE
// =============================================================================

/// The (user, application) edge: per-tenant view of a global user.
///
/// Created on first successful auth of a user into an application. A
/// banned profile short-circuits auth with a distinct error regardless
/// of credential correctness.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserApplicationProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub application_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub nickname: Option<String>,
    /// App-scoped structured metadata (e.g. telegram linkage)
    pub metadata: serde_json::Value,
    /// Ordered application-scoped role names
    pub app_roles: Vec<String>,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub banned_at: Option<DateTime<Utc>>,
    pub banned_by: Option<Uuid>,
    pub last_access_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// ROLES & PERMISSIONS
// =============================================================================

/// Application-scoped role. `application_id = NULL` means global.
/// Name uniqueness is `(name, application_id_or_nil)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub application_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Permission = (name, resource, action).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub resource: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// SESSION
// =============================================================================

/// The persistent record tying a refresh token to a user, application
/// and device.
///
/// Invariants:
/// - `(user, device_id, active)` has at most one row: repeat logins from
///   the same device mutate the row (token rotation), never insert
/// - `revoked_at` is monotonic: set once, never cleared
/// - `access_token_hash` enables immediate access-token revocation
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub application_id: Option<Uuid>,
    /// SHA-256 of the refresh token
    pub token_hash: String,
    /// SHA-256 of the paired access token
    pub access_token_hash: String,
    /// Opaque device id; NULL for callers that don't propagate one
    pub device_id: Option<String>,
    /// hash(deviceType:osFamily:browserFamily) - no version noise
    pub device_fingerprint: Option<String>,
    pub device_type: Option<String>,
    pub device_os: Option<String>,
    pub device_browser: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_name: Option<String>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Active = not revoked and not expired.
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none() && self.expires_at > Utc::now()
    }
}

/// Public session data for the session-management endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub application_id: Option<Uuid>,
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub device_os: Option<String>,
    pub device_browser: Option<String>,
    pub ip_address: Option<String>,
    pub session_name: Option<String>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<Session> for SessionView {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            application_id: s.application_id,
            device_id: s.device_id,
            device_type: s.device_type,
            device_os: s.device_os,
            device_browser: s.device_browser,
            ip_address: s.ip_address,
            session_name: s.session_name,
            last_active_at: s.last_active_at,
            expires_at: s.expires_at,
            created_at: s.created_at,
        }
    }
}

// =============================================================================
// OTP
// =============================================================================

/// OTP purpose. TTLs differ: login/2FA codes live 5 minutes,
/// registration/verification codes 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Verification,
    PasswordReset,
    TwoFactor,
    Login,
    Registration,
}

impl OtpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::PasswordReset => "password_reset",
            Self::TwoFactor => "2fa",
            Self::Login => "login",
            Self::Registration => "registration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verification" => Some(Self::Verification),
            "password_reset" => Some(Self::PasswordReset),
            "2fa" => Some(Self::TwoFactor),
            "login" => Some(Self::Login),
            "registration" => Some(Self::Registration),
            _ => None,
        }
    }
}

/// Single-use code sent to an email xor phone target.
///
/// At most one non-used OTP per (target, type): issuing a new code
/// invalidates the previous one.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Otp {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// bcrypt hash of the 6-digit code
    pub code_hash: String,
    pub otp_type: String,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// OAUTH ARTEFACTS (IdP as provider)
// =============================================================================

/// A relying OAuth/OIDC client registered with the IdP.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OAuthClient {
    pub id: Uuid,
    /// Public client identifier
    pub client_id: String,
    /// SHA-256 of the client secret; NULL for public clients
    pub client_secret_hash: Option<String>,
    pub name: String,
    /// `confidential` or `public`
    pub client_type: String,
    pub redirect_uris: Vec<String>,
    pub allowed_grant_types: Vec<String>,
    pub allowed_scopes: Vec<String>,
    /// PKCE is mandatory for public clients regardless of this flag
    pub require_pkce: bool,
    /// First-party clients skip the consent step
    pub first_party: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl OAuthClient {
    pub fn is_public(&self) -> bool {
        self.client_type == "public"
    }

    /// PKCE requirement: explicit flag, or implied by the public type.
    pub fn pkce_required(&self) -> bool {
        self.require_pkce || self.is_public()
    }
}

/// Single-use authorization code, bound to
/// (client, user, redirect_uri, scope, code_challenge, nonce).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub id: Uuid,
    pub code_hash: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    /// `S256` or `plain`
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// OAuth access or refresh token issued to a relying client.
///
/// `authorization_code_id` links tokens to their originating code so a
/// replayed code revokes everything from the first redemption.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OAuthToken {
    pub id: Uuid,
    pub token_hash: String,
    /// `access` or `refresh`
    pub token_kind: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub scope: String,
    pub authorization_code_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OAuthToken {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none() && self.expires_at > Utc::now()
    }
}

/// Remembered scope grant: user × client × scopes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserConsent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub granted_at: DateTime<Utc>,
}

/// Device authorization grant state.
///
/// Status transitions: `pending -> {authorized, denied, expired}`;
/// terminal states are sticky.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeviceCodeGrant {
    pub id: Uuid,
    pub device_code_hash: String,
    /// Short human-typable code shown on the secondary device
    pub user_code: String,
    pub client_id: String,
    pub scope: String,
    /// `pending`, `authorized`, `denied` or `expired`
    pub status: String,
    pub user_id: Option<Uuid>,
    pub interval_seconds: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// API KEY
// =============================================================================

/// Server-to-server credential (`agw_` prefix).
///
/// Validation requires prefix match, hash match, an active non-expired
/// key, and the required scope.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub key_hash: String,
    /// First 8 chars for display
    pub key_prefix: String,
    pub name: String,
    /// Subset of the closed scope set
    pub scopes: Vec<String>,
    /// Binding: the key may only act for this application
    pub application_id: Option<Uuid>,
    pub is_active: bool,
    /// NULL = never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_valid_now(&self) -> bool {
        self.is_active
            && self
                .expires_at
                .map(|exp| exp > Utc::now())
                .unwrap_or(true)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

// =============================================================================
// TOKEN EXCHANGE CODE
// =============================================================================

/// Cross-application SSO one-shot code (≤ 30 s TTL, single-use).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TokenExchangeCode {
    pub id: Uuid,
    pub code_hash: String,
    pub user_id: Uuid,
    pub source_application_id: Option<Uuid>,
    pub target_application_id: Uuid,
    /// Roles snapshot at issuance
    pub scope_snapshot: Vec<String>,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// IP FILTER
// =============================================================================

/// IP filter rule. Blacklist entries block outright; if any whitelist
/// entry exists for the scope, the caller IP must match one.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IpFilter {
    pub id: Uuid,
    pub application_id: Option<Uuid>,
    /// Single IP or CIDR block, e.g. `10.0.0.0/8`
    pub cidr: String,
    /// `blacklist` or `whitelist`
    pub filter_type: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// =============================================================================
// AUDIT LOG
// =============================================================================

/// One audit record: every authentication attempt, role change, token
/// revocation and admin action.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub application_id: Option<Uuid>,
    /// e.g. `auth.password_signin`, `admin.role_assign`
    pub action: String,
    /// `success` or `failure`
    pub outcome: String,
    /// Stable error code on failure (TOKEN_EXPIRED, BANNED, ...)
    pub error_category: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// What was acted on, e.g. `user:<id>`, `session:<id>`
    pub target: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// WEBHOOKS
// =============================================================================

/// A registered webhook endpoint for one application.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    pub application_id: Uuid,
    pub url: String,
    /// HMAC-SHA256 signing secret
    pub secret: String,
    /// Subscribed event names; empty = all events
    pub events: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Webhook {
    /// Whether this webhook subscribes to an event.
    pub fn wants(&self, event: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event)
    }
}

/// One delivery attempt record in the queue table.
///
/// Lifecycle: `pending -> delivering -> {succeeded, pending(retry), failed}`.
/// Workers claim due rows with a conditional update and perform network
/// I/O outside the claim.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event: String,
    /// Full signed body: `{event, timestamp, application_id, payload}`
    pub payload: serde_json::Value,
    pub status: String,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-webhook delivery counters for the status view.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookStats {
    pub webhook_id: Uuid,
    pub pending: i64,
    pub succeeded: i64,
    pub failed: i64,
}

// =============================================================================
// SAML
// =============================================================================

/// A SAML Service Provider registered with the IdP.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SamlServiceProvider {
    pub id: Uuid,
    pub application_id: Option<Uuid>,
    pub entity_id: String,
    /// Assertion Consumer Service URL the signed Response is POSTed to
    pub acs_url: String,
    pub slo_url: Option<String>,
    /// SP signing public key (SPKI PEM) used to verify signed
    /// requests; NULL skips request signature verification
    pub public_key_pem: Option<String>,
    /// attribute name -> user field ("email", "username", ...)
    pub attribute_mappings: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_method_roundtrip() {
        for method in [
            AuthMethod::Password,
            AuthMethod::OtpEmail,
            AuthMethod::OtpSms,
            AuthMethod::OauthGoogle,
            AuthMethod::OauthGithub,
            AuthMethod::OauthYandex,
            AuthMethod::OauthTelegram,
            AuthMethod::Totp,
            AuthMethod::ApiKey,
        ] {
            assert_eq!(AuthMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(AuthMethod::parse("smoke_signals"), None);
    }

    #[test]
    fn test_oauth_provider_mapping() {
        assert_eq!(
            AuthMethod::from_oauth_provider("google"),
            Some(AuthMethod::OauthGoogle)
        );
        assert_eq!(AuthMethod::from_oauth_provider("facebook"), None);
    }

    #[test]
    fn test_otp_type_roundtrip() {
        for t in [
            OtpType::Verification,
            OtpType::PasswordReset,
            OtpType::TwoFactor,
            OtpType::Login,
            OtpType::Registration,
        ] {
            assert_eq!(OtpType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_public_client_implies_pkce() {
        let client = OAuthClient {
            id: Uuid::new_v4(),
            client_id: "c".into(),
            client_secret_hash: None,
            name: "test".into(),
            client_type: "public".into(),
            redirect_uris: vec![],
            allowed_grant_types: vec![],
            allowed_scopes: vec![],
            require_pkce: false,
            first_party: false,
            is_active: true,
            created_at: Utc::now(),
        };
        assert!(client.pkce_required());
    }

    #[test]
    fn test_api_key_validity() {
        let mut key = ApiKey {
            id: Uuid::new_v4(),
            key_hash: "h".into(),
            key_prefix: "agw_XXXX".into(),
            name: "ci".into(),
            scopes: vec!["users:read".into()],
            application_id: None,
            is_active: true,
            expires_at: None,
            last_used_at: None,
            created_at: Utc::now(),
        };
        assert!(key.is_valid_now());
        assert!(key.has_scope("users:read"));
        assert!(!key.has_scope("email:send"));

        key.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(!key.is_valid_now());

        key.expires_at = None;
        key.is_active = false;
        assert!(!key.is_valid_now());
    }

    #[test]
    fn test_webhook_subscription() {
        let mut hook = Webhook {
            id: Uuid::new_v4(),
            application_id: Uuid::new_v4(),
            url: "https://example.com/hook".into(),
            secret: "s".into(),
            events: vec![],
            is_active: true,
            created_at: Utc::now(),
            deleted_at: None,
        };
        // Empty subscription list means all events
        assert!(hook.wants("user.created"));

        hook.events = vec!["user.login".into()];
        assert!(hook.wants("user.login"));
        assert!(!hook.wants("user.created"));
    }

    #[test]
    fn test_session_activity() {
        let mut session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            application_id: None,
            token_hash: "t".into(),
            access_token_hash: "a".into(),
            device_id: Some("D1".into()),
            device_fingerprint: None,
            device_type: None,
            device_os: None,
            device_browser: None,
            ip_address: None,
            user_agent: None,
            session_name: None,
            last_active_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::days(7),
            revoked_at: None,
            created_at: Utc::now(),
        };
        assert!(session.is_active());

        session.revoked_at = Some(Utc::now());
        assert!(!session.is_active());
    }
}
