//! # Server-to-Server Credentials
//!
//! API keys (`agw_` prefix) and application secrets (`app_` prefix), plus
//! the closed set of gRPC scopes API keys can carry.
//!
//! ## Credential Anatomy
//!
//! ```text
//! agw_Xy7KpQ2mN9fTbL4cRj8sWv1aGzH5dE3u
//! ├──┤├────────────────────────────────┤
//! │   └─ 32-char base62 payload (CSPRNG)
//! └─ prefix routes the credential before any parsing
//! ```
//!
//! Prefix detection must run before JWT parsing because all three
//! credential kinds can appear in the same `Authorization` header.
//!
//! ## Storage
//!
//! Only the SHA-256 hex digest of the full credential is stored, plus the
//! first 8 characters (`key_prefix`) for display in admin UIs. Validation
//! requires prefix match, hash match, an active non-expired key, and
//! the required scope.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq as _;

/// Prefix for API keys.
pub const API_KEY_PREFIX: &str = "agw_";
/// Prefix for application secrets.
pub const APP_SECRET_PREFIX: &str = "app_";

// =============================================================================
// Credential Kind Detection
// =============================================================================

/// The three credential kinds a protected route accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialKind {
    /// `agw_...` - server-to-server API key
    ApiKey(String),
    /// `app_...` - application secret
    AppSecret(String),
    /// Anything else is treated as a bearer JWT
    BearerJwt(String),
}

impl CredentialKind {
    /// Classifies a raw credential string by prefix.
    ///
    /// Must be called before JWT parsing; a JWT can never start with
    /// either reserved prefix (JWT headers are base64url of `{"alg"...`).
    pub fn detect(raw: &str) -> Self {
        if raw.starts_with(API_KEY_PREFIX) {
            Self::ApiKey(raw.to_string())
        } else if raw.starts_with(APP_SECRET_PREFIX) {
            Self::AppSecret(raw.to_string())
        } else {
            Self::BearerJwt(raw.to_string())
        }
    }
}

// =============================================================================
// Generation & Verification
// =============================================================================

/// A freshly generated credential. The `plain` form is shown to the
/// caller exactly once; only `hash` and `display_prefix` are stored.
#[derive(Debug, Clone)]
pub struct GeneratedCredential {
    /// Full credential, e.g. `agw_<payload>`. Never stored.
    pub plain: String,
    /// First 8 characters, stored for display ("agw_Xy7K...")
    pub display_prefix: String,
    /// SHA-256 hex digest of `plain`
    pub hash: String,
}

/// Generates a credential with the given prefix and a 32-char base62
/// payload.
pub fn generate(prefix: &str) -> GeneratedCredential {
    use rand::Rng as _;

    const BASE62: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let mut rng = rand::thread_rng();
    let payload: String = (0..32)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect();

    let plain = format!("{prefix}{payload}");
    let display_prefix = plain.chars().take(8).collect();
    let hash = hash_credential(&plain);

    GeneratedCredential {
        plain,
        display_prefix,
        hash,
    }
}

/// SHA-256 hex digest of a credential.
pub fn hash_credential(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compares a presented credential against a stored hash in constant
/// time.
pub fn verify(plain: &str, stored_hash: &str) -> bool {
    let presented = hash_credential(plain);
    presented.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

// =============================================================================
// gRPC Scopes
// =============================================================================

/// The closed set of scopes an API key can carry.
///
/// Each gRPC method requires exactly one of these; REST admin surfaces
/// reuse the same names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ApiScope {
    TokenValidate,
    TokenIntrospect,
    UsersRead,
    ProfileRead,
    AuthLogin,
    AuthRegister,
    AuthOtp,
    EmailSend,
    OauthRead,
    ExchangeManage,
    SyncUsers,
}

impl ApiScope {
    /// Wire representation, e.g. `token:validate`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenValidate => "token:validate",
            Self::TokenIntrospect => "token:introspect",
            Self::UsersRead => "users:read",
            Self::ProfileRead => "profile:read",
            Self::AuthLogin => "auth:login",
            Self::AuthRegister => "auth:register",
            Self::AuthOtp => "auth:otp",
            Self::EmailSend => "email:send",
            Self::OauthRead => "oauth:read",
            Self::ExchangeManage => "exchange:manage",
            Self::SyncUsers => "sync:users",
        }
    }

    /// Parses a wire scope name. Unknown names are rejected - the set is
    /// closed.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "token:validate" => Some(Self::TokenValidate),
            "token:introspect" => Some(Self::TokenIntrospect),
            "users:read" => Some(Self::UsersRead),
            "profile:read" => Some(Self::ProfileRead),
            "auth:login" => Some(Self::AuthLogin),
            "auth:register" => Some(Self::AuthRegister),
            "auth:otp" => Some(Self::AuthOtp),
            "email:send" => Some(Self::EmailSend),
            "oauth:read" => Some(Self::OauthRead),
            "exchange:manage" => Some(Self::ExchangeManage),
            "sync:users" => Some(Self::SyncUsers),
            _ => None,
        }
    }

    /// All scopes, for discovery documents and admin validation.
    pub fn all() -> &'static [ApiScope] {
        &[
            Self::TokenValidate,
            Self::TokenIntrospect,
            Self::UsersRead,
            Self::ProfileRead,
            Self::AuthLogin,
            Self::AuthRegister,
            Self::AuthOtp,
            Self::EmailSend,
            Self::OauthRead,
            Self::ExchangeManage,
            Self::SyncUsers,
        ]
    }
}

impl TryFrom<String> for ApiScope {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("unknown scope: {s}"))
    }
}

impl From<ApiScope> for String {
    fn from(scope: ApiScope) -> Self {
        scope.as_str().to_string()
    }
}

impl std::fmt::Display for ApiScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_shape() {
        let cred = generate(API_KEY_PREFIX);

        assert!(cred.plain.starts_with("agw_"));
        assert_eq!(cred.plain.len(), 4 + 32);
        assert_eq!(cred.display_prefix.len(), 8);
        assert!(cred.plain.starts_with(&cred.display_prefix));
        assert_eq!(cred.hash.len(), 64);
    }

    #[test]
    fn test_payload_is_base62() {
        let cred = generate(APP_SECRET_PREFIX);
        let payload = &cred.plain[4..];
        assert!(payload.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_keys_unique() {
        assert_ne!(generate(API_KEY_PREFIX).plain, generate(API_KEY_PREFIX).plain);
    }

    #[test]
    fn test_verify_roundtrip() {
        let cred = generate(API_KEY_PREFIX);
        assert!(verify(&cred.plain, &cred.hash));
        assert!(!verify("agw_wrong", &cred.hash));
    }

    #[test]
    fn test_detect_routes_by_prefix() {
        assert!(matches!(
            CredentialKind::detect("agw_abc"),
            CredentialKind::ApiKey(_)
        ));
        assert!(matches!(
            CredentialKind::detect("app_abc"),
            CredentialKind::AppSecret(_)
        ));
        assert!(matches!(
            CredentialKind::detect("eyJhbGciOiJSUzI1NiJ9.x.y"),
            CredentialKind::BearerJwt(_)
        ));
    }

    #[test]
    fn test_scope_roundtrip() {
        for scope in ApiScope::all() {
            assert_eq!(ApiScope::parse(scope.as_str()), Some(*scope));
        }
    }

    #[test]
    fn test_unknown_scope_rejected() {
        assert_eq!(ApiScope::parse("users:write"), None);
        assert_eq!(ApiScope::parse(""), None);
    }
}
