//! # Token Service
//!
//! Issues and verifies every token shape the IdP produces.
//!
//! ## Token Shapes
//!
//! | Shape | Form | TTL (default) | Persisted as |
//! |-------|------|---------------|--------------|
//! | Access | JWT (RS256/ES256, `kid` header) | 15 min | SHA-256 hash on the session row |
//! | Refresh | opaque 256-bit random | 7 days | SHA-256 hash on the session row |
//! | ID token | JWT, OIDC claims + `nonce` | 1 h | not persisted |
//! | Step-up | JWT, `typ=step_up` | ≤ 5 min | not persisted |
//!
//! OAuth provider access/refresh tokens are opaque strings hashed into
//! their own tables; they reuse [`TokenService::new_opaque_token`] and
//! [`TokenService::hash_token`].
//!
//! ## Verification Contract
//!
//! 1. Parse the header, resolve `kid` against the key manager
//! 2. Check signature + `iss` + expiry with 60 s clock-skew leeway
//! 3. Check the token type matches the operation
//!
//! Revocation and blacklist checks need storage access and live in the
//! policy gate; this service is pure computation over the key set.
//!
//! ## Security Notes
//!
//! - Signing is asymmetric; products verify with the published JWKS
//! - Refresh tokens never appear in a JWT: they are opaque and only
//!   their hash is stored
//! - The `jti` claim makes every issued token distinct

use crate::config::TokenConfig;
use crate::crypto::keys::KeyManager;
use crate::errors::ApiError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// Claims
// =============================================================================

/// Token type discriminator, embedded as the `type` claim.
///
/// Prevents a step-up token from being replayed as an access token and
/// vice versa.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived API authorization token
    Access,
    /// OIDC ID token
    Id,
    /// 2FA second-leg token proving password completion
    StepUp,
}

/// Access token claims.
///
/// `application_id` and `app_roles` are present when the sign-in was
/// scoped to an application; tokens minted for bare user sessions omit
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject - the user's unique identifier
    pub sub: Uuid,
    /// User's email, empty string when the account is phone-only
    pub email: String,
    /// Username for display
    pub username: String,
    /// Global role names held by the user
    pub roles: Vec<String>,
    /// Application-scoped roles from the user's profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_roles: Option<Vec<String>>,
    /// The application this token is scoped to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<Uuid>,
    /// Global active flag at issuance time
    pub is_active: bool,
    /// Issuer
    pub iss: String,
    /// Expiration (Unix seconds)
    pub exp: i64,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Unique token id
    pub jti: Uuid,
    /// Token type discriminator
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// OIDC ID token claims. `aud` is the relying client id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdClaims {
    pub iss: String,
    pub sub: Uuid,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    /// Nonce echoed from the authorize request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// Step-up token claims: binds the pending 2FA leg to
/// `(user, authenticator)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepUpClaims {
    pub sub: Uuid,
    /// Application the eventual session will be scoped to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<Uuid>,
    /// Authenticator expected for the second leg, e.g. `totp`
    pub authenticator: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// A pair of access and refresh tokens returned after authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// JWT for API authorization: `Authorization: Bearer <token>`
    pub access_token: String,
    /// Opaque refresh token; exchange at `/api/auth/refresh`
    pub refresh_token: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    /// Seconds until the refresh token expires
    pub refresh_expires_in: i64,
}

/// Everything the token engine needs to know about a user at issuance.
///
/// A plain value type so services can build it from the entity without
/// the engine depending on the domain layer.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub roles: Vec<String>,
    pub app_roles: Option<Vec<String>>,
    pub application_id: Option<Uuid>,
    pub is_active: bool,
    pub email_verified: bool,
}

// =============================================================================
// Token Service
// =============================================================================

/// Service for token issuance and verification.
///
/// Created once at startup and shared via `Arc`. All state lives in the
/// key manager; the service itself is immutable.
#[derive(Clone)]
pub struct TokenService {
    keys: Arc<KeyManager>,
    config: TokenConfig,
}

impl TokenService {
    /// Creates a new token service over the given key set.
    pub fn new(keys: Arc<KeyManager>, config: TokenConfig) -> Self {
        Self { keys, config }
    }

    /// The key manager backing this service (JWKS publication, rotation).
    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Access to the TTL configuration.
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    // =========================================================================
    // ISSUANCE
    // =========================================================================

    /// Issues an access + refresh pair for a subject.
    ///
    /// The caller persists `hash_token(refresh)` and `hash_token(access)`
    /// on the session row; the engine never stores anything.
    pub fn issue_pair(&self, subject: &TokenSubject) -> Result<TokenPair, ApiError> {
        let access_token = self.issue_access(subject)?;
        let refresh_token = Self::new_opaque_token();

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.config.access_token_ttl_seconds as i64,
            refresh_expires_in: self.config.refresh_token_ttl_seconds as i64,
        })
    }

    /// Issues a signed access token.
    pub fn issue_access(&self, subject: &TokenSubject) -> Result<String, ApiError> {
        let now = Utc::now();
        let ttl = Duration::seconds(self.config.access_token_ttl_seconds as i64);

        let claims = AccessClaims {
            sub: subject.user_id,
            email: subject.email.clone(),
            username: subject.username.clone(),
            roles: subject.roles.clone(),
            app_roles: subject.app_roles.clone(),
            application_id: subject.application_id,
            is_active: subject.is_active,
            iss: self.config.issuer.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
            token_type: TokenType::Access,
        };

        self.sign(&claims)
    }

    /// Issues an OIDC ID token for a relying client.
    pub fn issue_id_token(
        &self,
        subject: &TokenSubject,
        client_id: &str,
        nonce: Option<String>,
    ) -> Result<String, ApiError> {
        let now = Utc::now();
        let ttl = Duration::seconds(self.config.id_token_ttl_seconds as i64);

        let claims = IdClaims {
            iss: self.config.issuer.clone(),
            sub: subject.user_id,
            aud: client_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            nonce,
            email: if subject.email.is_empty() {
                None
            } else {
                Some(subject.email.clone())
            },
            email_verified: subject.email_verified,
            preferred_username: Some(subject.username.clone()),
            token_type: TokenType::Id,
        };

        self.sign(&claims)
    }

    /// Issues a step-up token after a successful password leg when the
    /// user has TOTP enrolled. TTL is capped at 5 minutes regardless of
    /// configuration.
    pub fn issue_step_up(
        &self,
        user_id: Uuid,
        application_id: Option<Uuid>,
        authenticator: &str,
    ) -> Result<String, ApiError> {
        let now = Utc::now();
        let ttl_seconds = self.config.step_up_ttl_seconds.min(300);
        let ttl = Duration::seconds(ttl_seconds as i64);

        let claims = StepUpClaims {
            sub: user_id,
            application_id,
            authenticator: authenticator.to_string(),
            iss: self.config.issuer.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
            token_type: TokenType::StepUp,
        };

        self.sign(&claims)
    }

    /// Generates an opaque high-entropy token (refresh tokens, OAuth
    /// provider tokens, authorization codes before hashing).
    ///
    /// 32 random bytes, base64url without padding: 43 characters.
    pub fn new_opaque_token() -> String {
        use rand::RngCore as _;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// SHA-256 hex digest of a token. The only form that ever reaches
    /// storage.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, ApiError> {
        let key = self.keys.current();
        let mut header = Header::new(key.algorithm.jwt_algorithm());
        header.kid = Some(key.kid.clone());

        encode(&header, claims, key.encoding_key()).map_err(|e| ApiError::InternalError {
            message: format!("Failed to sign token: {}", e),
        })
    }

    // =========================================================================
    // VERIFICATION
    // =========================================================================

    /// Verifies an access token: signature, issuer, expiry (60 s leeway),
    /// and type.
    ///
    /// Revocation/blacklist checks are the policy gate's job.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, ApiError> {
        let claims: AccessClaims = self.decode(token)?;

        if claims.token_type != TokenType::Access {
            return Err(ApiError::TokenInvalid);
        }

        Ok(claims)
    }

    /// Verifies a step-up token. A mismatched or malformed step-up token
    /// is `TokenInvalid`; per the orchestrator's tie-break it does count
    /// toward lockout, unlike a TOTP mismatch under a valid token.
    pub fn verify_step_up(&self, token: &str) -> Result<StepUpClaims, ApiError> {
        let claims: StepUpClaims = self.decode(token)?;

        if claims.token_type != TokenType::StepUp {
            return Err(ApiError::TokenInvalid);
        }

        Ok(claims)
    }

    /// Decodes any of our JWT shapes with the standard checks.
    fn decode<T: serde::de::DeserializeOwned>(&self, token: &str) -> Result<T, ApiError> {
        // The kid in the header selects the verification key; an unknown
        // kid means the key was rotated out and the token is dead
        let header = decode_header(token).map_err(|_| ApiError::TokenInvalid)?;
        let kid = header.kid.ok_or(ApiError::TokenInvalid)?;
        let key = self.keys.by_kid(&kid).map_err(ApiError::from)?;

        let mut validation = Validation::new(key.algorithm.jwt_algorithm());
        validation.leeway = 60;
        validation.set_issuer(&[&self.config.issuer]);
        // Access/step-up tokens carry no aud; ID tokens are validated by
        // the relying party, not by us
        validation.validate_aud = false;

        let token_data: TokenData<T> =
            decode(token, key.decoding_key(), &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::TokenExpired,
                _ => ApiError::TokenInvalid,
            })?;

        Ok(token_data.claims)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.config.issuer)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyAlgorithm;

    fn test_config() -> TokenConfig {
        TokenConfig {
            issuer: "test-issuer".to_string(),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 604800,
            id_token_ttl_seconds: 3600,
            step_up_ttl_seconds: 300,
            auth_code_ttl_seconds: 600,
            exchange_code_ttl_seconds: 30,
            device_poll_interval_seconds: 5,
            device_code_ttl_seconds: 600,
        }
    }

    fn test_service(alg: KeyAlgorithm) -> TokenService {
        let keys = Arc::new(KeyManager::bootstrap(alg).unwrap());
        TokenService::new(keys, test_config())
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            username: "test".to_string(),
            roles: vec!["user".to_string()],
            app_roles: Some(vec!["member".to_string()]),
            application_id: Some(Uuid::new_v4()),
            is_active: true,
            email_verified: true,
        }
    }

    #[test]
    fn test_access_roundtrip_rs256() {
        let service = test_service(KeyAlgorithm::Rs256);
        let subject = subject();

        let token = service.issue_access(&subject).unwrap();
        let claims = service.verify_access(&token).unwrap();

        assert_eq!(claims.sub, subject.user_id);
        assert_eq!(claims.email, subject.email);
        assert_eq!(claims.roles, subject.roles);
        assert_eq!(claims.application_id, subject.application_id);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn test_access_roundtrip_es256() {
        let service = test_service(KeyAlgorithm::Es256);
        let token = service.issue_access(&subject()).unwrap();
        assert!(service.verify_access(&token).is_ok());
    }

    #[test]
    fn test_header_carries_kid() {
        let service = test_service(KeyAlgorithm::Rs256);
        let token = service.issue_access(&subject()).unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(service.keys().current().kid.as_str()));
    }

    #[test]
    fn test_old_key_verifies_after_rotation() {
        let service = test_service(KeyAlgorithm::Rs256);
        let old_token = service.issue_access(&subject()).unwrap();
        let old_kid = service.keys().current().kid.clone();

        let new_kid = service.keys().rotate(KeyAlgorithm::Rs256).unwrap();
        let new_token = service.issue_access(&subject()).unwrap();

        // Pre-rotation token still verifies; post-rotation tokens carry
        // the new kid
        assert!(service.verify_access(&old_token).is_ok());
        assert_eq!(
            decode_header(&new_token).unwrap().kid.as_deref(),
            Some(new_kid.as_str())
        );
        assert_ne!(old_kid, new_kid);
    }

    #[test]
    fn test_removed_key_stops_verifying() {
        let service = test_service(KeyAlgorithm::Rs256);
        let old_token = service.issue_access(&subject()).unwrap();
        let old_kid = service.keys().current().kid.clone();

        service.keys().rotate(KeyAlgorithm::Rs256).unwrap();
        service.keys().remove(&old_kid).unwrap();

        assert!(matches!(
            service.verify_access(&old_token),
            Err(ApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_step_up_rejected_as_access() {
        let service = test_service(KeyAlgorithm::Rs256);
        let step_up = service
            .issue_step_up(Uuid::new_v4(), None, "totp")
            .unwrap();

        assert!(matches!(
            service.verify_access(&step_up),
            Err(ApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_access_rejected_as_step_up() {
        let service = test_service(KeyAlgorithm::Rs256);
        let access = service.issue_access(&subject()).unwrap();

        assert!(matches!(
            service.verify_step_up(&access),
            Err(ApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_opaque_tokens_unique_and_sized() {
        let a = TokenService::new_opaque_token();
        let b = TokenService::new_opaque_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43); // 32 bytes base64url unpadded
    }

    #[test]
    fn test_hash_token_deterministic() {
        assert_eq!(
            TokenService::hash_token("token"),
            TokenService::hash_token("token")
        );
        assert_ne!(
            TokenService::hash_token("token1"),
            TokenService::hash_token("token2")
        );
        assert_eq!(TokenService::hash_token("x").len(), 64);
    }

    #[test]
    fn test_tampered_token_invalid() {
        let service = test_service(KeyAlgorithm::Rs256);
        let mut token = service.issue_access(&subject()).unwrap();
        // Flip a char in the payload segment
        let mid = token.len() / 2;
        let replacement = if token.as_bytes()[mid] == b'A' { "B" } else { "A" };
        token.replace_range(mid..mid + 1, replacement);

        assert!(service.verify_access(&token).is_err());
    }

    #[test]
    fn test_id_token_carries_nonce() {
        let service = test_service(KeyAlgorithm::Rs256);
        let token = service
            .issue_id_token(&subject(), "client-1", Some("n-0S6_WzA2Mj".to_string()))
            .unwrap();

        // Decode without verification helpers: use the service's key
        let header = decode_header(&token).unwrap();
        let key = service.keys().by_kid(&header.kid.unwrap()).unwrap();
        let mut validation = Validation::new(key.algorithm.jwt_algorithm());
        validation.set_issuer(&["test-issuer"]);
        validation.set_audience(&["client-1"]);
        let data: TokenData<IdClaims> =
            decode(&token, key.decoding_key(), &validation).unwrap();

        assert_eq!(data.claims.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
        assert_eq!(data.claims.aud, "client-1");
    }

    #[test]
    fn test_step_up_ttl_capped() {
        let mut config = test_config();
        config.step_up_ttl_seconds = 86400; // absurdly long
        let keys = Arc::new(KeyManager::bootstrap(KeyAlgorithm::Rs256).unwrap());
        let service = TokenService::new(keys, config);

        let token = service.issue_step_up(Uuid::new_v4(), None, "totp").unwrap();
        let claims = service.verify_step_up(&token).unwrap();

        assert!(claims.exp - claims.iat <= 300);
    }
}
