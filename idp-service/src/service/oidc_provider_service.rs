//! # OIDC / OAuth Provider
//!
//! The IdP side of the authorization-code dance: relying clients send
//! users here, we hand back codes and tokens.
//!
//! ## Supported Grants
//!
//! | Grant | Notes |
//! |-------|-------|
//! | `authorization_code` | PKCE (S256/plain); mandatory for public clients |
//! | `refresh_token` | rotation: the old refresh token is revoked |
//! | device code | `SlowDown` pacing, sticky terminal states |
//!
//! ## Code Replay Defence
//!
//! Codes are single-use via conditional update. A second redemption not
//! only fails with `invalid_grant` - it revokes every token minted from
//! the first redemption, because a replayed code means the code (and
//! probably the tokens) leaked.
//!
//! ## Endpoints Fed By This Service
//!
//! `/.well-known/openid-configuration`, `/oauth/authorize`,
//! `/oauth/token`, `/oauth/introspect`, `/oauth/revoke`,
//! `/oauth/userinfo`, `/oauth/device`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::auth::api_key;
use shared::auth::jwt::TokenService;
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{AuthorizationCode, OAuthClient, User};
use crate::repository::OAuthRepository;
use crate::service::identity_service::IdentityService;

/// Scopes seeded at install time and advertised in discovery.
pub const SEEDED_SCOPES: &[&str] = &[
    "openid",
    "profile",
    "email",
    "offline_access",
    "admin:users",
    "admin:applications",
    "admin:webhooks",
];

/// OAuth access tokens issued to relying clients live one hour.
const OAUTH_ACCESS_TTL_SECONDS: i64 = 3600;
/// OAuth refresh tokens live 30 days.
const OAUTH_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 3600;

/// User-code alphabet: no vowels, no ambiguous glyphs.
const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ23456789";

// =============================================================================
// REQUEST / RESPONSE TYPES
// =============================================================================

/// Validated `/oauth/authorize` query.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    #[serde(default)]
    pub scope: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// What the authorize endpoint does next.
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    /// Code issued; redirect the browser here.
    Redirect(String),
    /// The (external) consent screen must run first.
    ConsentRequired {
        client_id: String,
        client_name: String,
        scopes: Vec<String>,
    },
}

/// `/oauth/token` response body.
#[derive(Debug, Clone, Serialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// `/oauth/introspect` response body (RFC 7662).
#[derive(Debug, Clone, Serialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            sub: None,
            exp: None,
            token_type: None,
        }
    }
}

/// `/oauth/device` response body (RFC 8628).
#[derive(Debug, Clone, Serialize)]
pub struct DeviceAuthorizationResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub interval: i64,
}

/// `/oauth/userinfo` response body.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfoResponse {
    pub sub: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

// =============================================================================
// SERVICE
// =============================================================================

/// The provider service.
pub struct OidcProviderService {
    oauth: OAuthRepository,
    identity: Arc<IdentityService>,
    tokens: Arc<TokenService>,
    redis: RedisClient,
    public_url: String,
}

impl OidcProviderService {
    pub fn new(
        oauth: OAuthRepository,
        identity: Arc<IdentityService>,
        tokens: Arc<TokenService>,
        redis: RedisClient,
        public_url: String,
    ) -> Self {
        Self {
            oauth,
            identity,
            tokens,
            redis,
            public_url,
        }
    }

    // =========================================================================
    // DISCOVERY
    // =========================================================================

    /// The `/.well-known/openid-configuration` document.
    pub fn discovery_document(&self) -> serde_json::Value {
        let base = &self.public_url;
        serde_json::json!({
            "issuer": self.tokens.config().issuer,
            "authorization_endpoint": format!("{base}/oauth/authorize"),
            "token_endpoint": format!("{base}/oauth/token"),
            "introspection_endpoint": format!("{base}/oauth/introspect"),
            "revocation_endpoint": format!("{base}/oauth/revoke"),
            "userinfo_endpoint": format!("{base}/oauth/userinfo"),
            "device_authorization_endpoint": format!("{base}/oauth/device"),
            "jwks_uri": format!("{base}/.well-known/jwks.json"),
            "scopes_supported": SEEDED_SCOPES,
            "response_types_supported": ["code"],
            "grant_types_supported": [
                "authorization_code",
                "refresh_token",
                "urn:ietf:params:oauth:grant-type:device_code"
            ],
            "code_challenge_methods_supported": ["S256", "plain"],
            "token_endpoint_auth_methods_supported": [
                "client_secret_basic",
                "client_secret_post",
                "none"
            ],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256", "ES256"],
        })
    }

    // =========================================================================
    // AUTHORIZE
    // =========================================================================

    /// Validates an authorize request and either issues a code or asks
    /// for consent.
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        user: &User,
    ) -> Result<AuthorizeOutcome, ApiError> {
        let client = self.load_client(&request.client_id).await?;

        if !client.redirect_uris.iter().any(|u| u == &request.redirect_uri) {
            return Err(ApiError::BadRequest {
                message: "redirect_uri is not registered for this client".to_string(),
            });
        }

        if request.response_type != "code" {
            return Err(ApiError::BadRequest {
                message: "unsupported response_type".to_string(),
            });
        }

        let scopes = Self::parse_scopes(&request.scope);
        for scope in &scopes {
            if !client.allowed_scopes.iter().any(|s| s == scope) {
                return Err(ApiError::InsufficientScope {
                    required: scope.clone(),
                });
            }
        }

        // PKCE: required for public clients, validated when present
        match (&request.code_challenge, &request.code_challenge_method) {
            (None, _) if client.pkce_required() => {
                return Err(ApiError::BadRequest {
                    message: "code_challenge is required for this client".to_string(),
                });
            }
            (Some(_), Some(method)) if method != "S256" && method != "plain" => {
                return Err(ApiError::BadRequest {
                    message: "unsupported code_challenge_method".to_string(),
                });
            }
            _ => {}
        }

        // First-party clients skip consent; others need a recorded
        // grant covering every requested scope
        if !client.first_party {
            let consent = self.oauth.find_consent(user.id, &client.client_id).await?;
            let covered = consent
                .map(|c| scopes.iter().all(|s| c.scopes.contains(s)))
                .unwrap_or(false);

            if !covered {
                return Ok(AuthorizeOutcome::ConsentRequired {
                    client_id: client.client_id.clone(),
                    client_name: client.name.clone(),
                    scopes,
                });
            }
        }

        let url = self.issue_code(&client, user, request, &scopes).await?;
        Ok(AuthorizeOutcome::Redirect(url))
    }

    /// Records consent and returns the redirect with a fresh code.
    pub async fn grant_consent(
        &self,
        request: &AuthorizeRequest,
        user: &User,
    ) -> Result<String, ApiError> {
        let client = self.load_client(&request.client_id).await?;
        let scopes = Self::parse_scopes(&request.scope);

        self.oauth
            .upsert_consent(user.id, &client.client_id, &scopes)
            .await?;

        self.issue_code(&client, user, request, &scopes).await
    }

    async fn issue_code(
        &self,
        client: &OAuthClient,
        user: &User,
        request: &AuthorizeRequest,
        scopes: &[String],
    ) -> Result<String, ApiError> {
        let code = TokenService::new_opaque_token();
        let code_hash = TokenService::hash_token(&code);

        self.oauth
            .create_authorization_code(
                &code_hash,
                &client.client_id,
                user.id,
                &request.redirect_uri,
                &scopes.join(" "),
                request.code_challenge.as_deref(),
                request.code_challenge_method.as_deref(),
                request.nonce.as_deref(),
                self.tokens.config().auth_code_ttl_seconds,
            )
            .await?;

        info!(client_id = %client.client_id, user_id = %user.id, "Authorization code issued");

        let mut url = format!(
            "{}{}code={}",
            request.redirect_uri,
            if request.redirect_uri.contains('?') { "&" } else { "?" },
            urlencoding::encode(&code)
        );
        if let Some(state) = &request.state {
            url.push_str(&format!("&state={}", urlencoding::encode(state)));
        }

        Ok(url)
    }

    // =========================================================================
    // TOKEN ENDPOINT
    // =========================================================================

    /// Authorization-code grant.
    ///
    /// Client authentication: confidential clients present their secret;
    /// public clients prove the PKCE verifier.
    pub async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant, ApiError> {
        let client = self.load_client(client_id).await?;
        self.authenticate_client(&client, client_secret)?;

        let code_hash = TokenService::hash_token(code);
        let stored = self
            .oauth
            .find_authorization_code(&code_hash)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        if stored.client_id != client.client_id || stored.redirect_uri != redirect_uri {
            return Err(ApiError::InvalidCredentials);
        }

        // Replay: the code was already redeemed. Burn everything the
        // first redemption produced.
        if stored.used {
            let revoked = self.oauth.revoke_tokens_for_code(stored.id).await?;
            warn!(
                client_id = %client.client_id,
                tokens_revoked = revoked,
                "Authorization code replay detected"
            );
            return Err(ApiError::Conflict {
                resource: "authorization code already redeemed".to_string(),
            });
        }

        if stored.expires_at <= Utc::now() {
            return Err(ApiError::InvalidCredentials);
        }

        Self::verify_pkce(&stored, code_verifier)?;

        // Single-shot; the race loser triggers the replay path above on
        // its own retry
        if !self.oauth.consume_authorization_code(stored.id).await? {
            let revoked = self.oauth.revoke_tokens_for_code(stored.id).await?;
            warn!(tokens_revoked = revoked, "Authorization code raced");
            return Err(ApiError::Conflict {
                resource: "authorization code already redeemed".to_string(),
            });
        }

        let user = self
            .identity
            .users()
            .find_by_id(stored.user_id)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        self.mint_tokens(&client, &user, &stored.scope, Some(stored.id), stored.nonce.clone())
            .await
    }

    /// Refresh-token grant with rotation.
    pub async fn refresh_grant(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
        refresh_token: &str,
    ) -> Result<TokenGrant, ApiError> {
        let client = self.load_client(client_id).await?;
        self.authenticate_client(&client, client_secret)?;

        let hash = TokenService::hash_token(refresh_token);
        let stored = self
            .oauth
            .find_token(&hash)
            .await?
            .filter(|t| t.token_kind == "refresh" && t.client_id == client.client_id)
            .ok_or(ApiError::InvalidCredentials)?;

        if !stored.is_active() {
            return Err(ApiError::InvalidCredentials);
        }

        // Rotation: the presented refresh token dies here
        self.oauth.revoke_token(&hash).await?;

        let user = self
            .identity
            .users()
            .find_by_id(stored.user_id)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        self.mint_tokens(&client, &user, &stored.scope, stored.authorization_code_id, None)
            .await
    }

    async fn mint_tokens(
        &self,
        client: &OAuthClient,
        user: &User,
        scope: &str,
        authorization_code_id: Option<Uuid>,
        nonce: Option<String>,
    ) -> Result<TokenGrant, ApiError> {
        let scopes = Self::parse_scopes(scope);

        let access_token = TokenService::new_opaque_token();
        let access_expires = Utc::now() + ChronoDuration::seconds(OAUTH_ACCESS_TTL_SECONDS);
        self.oauth
            .create_token(
                &TokenService::hash_token(&access_token),
                "access",
                &client.client_id,
                user.id,
                scope,
                authorization_code_id,
                access_expires,
            )
            .await?;

        let refresh_token = if scopes.iter().any(|s| s == "offline_access")
            && client.allowed_grant_types.iter().any(|g| g == "refresh_token")
        {
            let token = TokenService::new_opaque_token();
            let expires = Utc::now() + ChronoDuration::seconds(OAUTH_REFRESH_TTL_SECONDS);
            self.oauth
                .create_token(
                    &TokenService::hash_token(&token),
                    "refresh",
                    &client.client_id,
                    user.id,
                    scope,
                    authorization_code_id,
                    expires,
                )
                .await?;
            Some(token)
        } else {
            None
        };

        let id_token = if scopes.iter().any(|s| s == "openid") {
            let subject = self.identity.resolve_subject(user, None).await?;
            Some(
                self.tokens
                    .issue_id_token(&subject, &client.client_id, nonce)?,
            )
        } else {
            None
        };

        Ok(TokenGrant {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: OAUTH_ACCESS_TTL_SECONDS,
            refresh_token,
            id_token,
            scope: scope.to_string(),
        })
    }

    // =========================================================================
    // INTROSPECTION / REVOCATION / USERINFO
    // =========================================================================

    /// RFC 7662 introspection. Unknown or dead tokens are simply
    /// `active: false` - no information leaks.
    pub async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, ApiError> {
        let hash = TokenService::hash_token(token);

        let stored = match self.oauth.find_token(&hash).await? {
            Some(t) => t,
            None => return Ok(IntrospectionResponse::inactive()),
        };

        if !stored.is_active() {
            return Ok(IntrospectionResponse::inactive());
        }

        Ok(IntrospectionResponse {
            active: true,
            scope: Some(stored.scope.clone()),
            client_id: Some(stored.client_id.clone()),
            sub: Some(stored.user_id.to_string()),
            exp: Some(stored.expires_at.timestamp()),
            token_type: Some(stored.token_kind),
        })
    }

    /// RFC 7009 revocation. Succeeds regardless of whether the token
    /// existed.
    pub async fn revoke(&self, token: &str) -> Result<(), ApiError> {
        let hash = TokenService::hash_token(token);
        self.oauth.revoke_token(&hash).await?;
        Ok(())
    }

    /// OIDC userinfo for a bearer OAuth access token.
    pub async fn userinfo(&self, access_token: &str) -> Result<UserInfoResponse, ApiError> {
        let hash = TokenService::hash_token(access_token);
        let stored = self
            .oauth
            .find_token(&hash)
            .await?
            .filter(|t| t.token_kind == "access" && t.is_active())
            .ok_or(ApiError::TokenInvalid)?;

        let user = self
            .identity
            .users()
            .find_by_id(stored.user_id)
            .await?
            .ok_or(ApiError::TokenInvalid)?;

        let scopes = Self::parse_scopes(&stored.scope);
        let wants_email = scopes.iter().any(|s| s == "email");
        let wants_profile = scopes.iter().any(|s| s == "profile");

        Ok(UserInfoResponse {
            sub: user.id,
            email: if wants_email { user.email.clone() } else { None },
            email_verified: if wants_email {
                Some(user.email_verified)
            } else {
                None
            },
            preferred_username: if wants_profile {
                Some(user.username.clone())
            } else {
                None
            },
        })
    }

    // =========================================================================
    // DEVICE AUTHORIZATION GRANT
    // =========================================================================

    /// Starts a device grant: issues the code pair.
    pub async fn device_authorize(
        &self,
        client_id: &str,
        scope: &str,
    ) -> Result<DeviceAuthorizationResponse, ApiError> {
        let client = self.load_client(client_id).await?;

        let scopes = Self::parse_scopes(scope);
        for s in &scopes {
            if !client.allowed_scopes.iter().any(|allowed| allowed == s) {
                return Err(ApiError::InsufficientScope { required: s.clone() });
            }
        }

        let device_code = TokenService::new_opaque_token();
        let user_code = Self::generate_user_code();
        let interval = self.tokens.config().device_poll_interval_seconds as i32;
        let ttl = self.tokens.config().device_code_ttl_seconds;

        let grant = self
            .oauth
            .create_device_grant(
                &TokenService::hash_token(&device_code),
                &user_code,
                &client.client_id,
                &scopes.join(" "),
                interval,
                ttl,
            )
            .await?;

        Ok(DeviceAuthorizationResponse {
            device_code,
            user_code: grant.user_code.clone(),
            verification_uri: format!("{}/device", self.public_url),
            verification_uri_complete: format!(
                "{}/device?user_code={}",
                self.public_url, grant.user_code
            ),
            expires_in: ttl as i64,
            interval: interval as i64,
        })
    }

    /// Device polling leg of `/oauth/token`.
    ///
    /// Polls faster than `interval` get `SlowDown` (surfaced as
    /// `RateLimited`). Terminal states are sticky; `authorized` issues
    /// tokens exactly once.
    pub async fn device_token(
        &self,
        client_id: &str,
        device_code: &str,
    ) -> Result<TokenGrant, ApiError> {
        let client = self.load_client(client_id).await?;

        let hash = TokenService::hash_token(device_code);
        let grant = self
            .oauth
            .find_device_grant_by_code_hash(&hash)
            .await?
            .filter(|g| g.client_id == client.client_id)
            .ok_or(ApiError::InvalidCredentials)?;

        // Pacing: one poll per interval per device code
        let pace_key = format!("device:poll:{hash}");
        let fresh = self
            .redis
            .set_nx(
                &pace_key,
                &true,
                Duration::from_secs(grant.interval_seconds.max(1) as u64),
            )
            .await?;
        if !fresh {
            return Err(ApiError::RateLimited {
                retry_after_seconds: grant.interval_seconds.max(1) as u64,
            });
        }

        if grant.expires_at <= Utc::now() && grant.status == "pending" {
            self.oauth
                .resolve_device_grant(grant.id, "expired", None)
                .await?;
            return Err(ApiError::TokenExpired);
        }

        match grant.status.as_str() {
            "pending" => Err(ApiError::BadRequest {
                message: "authorization_pending".to_string(),
            }),
            "denied" => Err(ApiError::AccessDenied),
            "expired" => Err(ApiError::TokenExpired),
            "authorized" => {
                // Tokens are minted once per grant
                let issued_key = format!("device:issued:{hash}");
                let first = self
                    .redis
                    .set_nx(&issued_key, &true, Duration::from_secs(600))
                    .await?;
                if !first {
                    return Err(ApiError::Conflict {
                        resource: "device code already redeemed".to_string(),
                    });
                }

                let user_id = grant.user_id.ok_or(ApiError::InternalError {
                    message: "authorized grant without user".to_string(),
                })?;
                let user = self
                    .identity
                    .users()
                    .find_by_id(user_id)
                    .await?
                    .ok_or(ApiError::InvalidCredentials)?;

                self.mint_tokens(&client, &user, &grant.scope, None, None).await
            }
            other => Err(ApiError::InternalError {
                message: format!("unexpected device grant status: {other}"),
            }),
        }
    }

    /// The signed-in user approves or denies a user code.
    pub async fn resolve_user_code(
        &self,
        user_code: &str,
        user: &User,
        approve: bool,
    ) -> Result<(), ApiError> {
        let grant = self
            .oauth
            .find_device_grant_by_user_code(user_code)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: "device code".to_string(),
            })?;

        if grant.expires_at <= Utc::now() {
            self.oauth
                .resolve_device_grant(grant.id, "expired", None)
                .await?;
            return Err(ApiError::TokenExpired);
        }

        let status = if approve { "authorized" } else { "denied" };
        let moved = self
            .oauth
            .resolve_device_grant(grant.id, status, approve.then_some(user.id))
            .await?;

        if !moved {
            // Already terminal; sticky
            return Err(ApiError::Conflict {
                resource: "device code already resolved".to_string(),
            });
        }

        Ok(())
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    async fn load_client(&self, client_id: &str) -> Result<OAuthClient, ApiError> {
        self.oauth
            .find_client(client_id)
            .await?
            .ok_or(ApiError::InvalidCredentials)
    }

    /// Confidential clients must present their secret; public clients
    /// must not rely on one.
    fn authenticate_client(
        &self,
        client: &OAuthClient,
        client_secret: Option<&str>,
    ) -> Result<(), ApiError> {
        match (&client.client_secret_hash, client_secret) {
            (Some(stored), Some(presented)) => {
                if api_key::verify(presented, stored) {
                    Ok(())
                } else {
                    Err(ApiError::InvalidCredentials)
                }
            }
            (Some(_), None) => Err(ApiError::InvalidCredentials),
            // Public client: PKCE is the proof
            (None, _) => Ok(()),
        }
    }

    fn verify_pkce(code: &AuthorizationCode, verifier: Option<&str>) -> Result<(), ApiError> {
        let challenge = match &code.code_challenge {
            Some(c) => c,
            None => return Ok(()),
        };

        let verifier = verifier.ok_or(ApiError::BadRequest {
            message: "code_verifier is required".to_string(),
        })?;

        let matches = match code.code_challenge_method.as_deref() {
            Some("plain") => challenge == verifier,
            // Default method is S256
            _ => {
                let digest = Sha256::digest(verifier.as_bytes());
                challenge == &URL_SAFE_NO_PAD.encode(digest)
            }
        };

        if matches {
            Ok(())
        } else {
            Err(ApiError::InvalidCredentials)
        }
    }

    fn parse_scopes(scope: &str) -> Vec<String> {
        scope
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>()
    }

    /// Human-typable code: `XXXX-XXXX` from an unambiguous alphabet.
    fn generate_user_code() -> String {
        use rand::Rng as _;
        let mut rng = rand::thread_rng();
        let mut pick = || USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())] as char;

        let first: String = (0..4).map(|_| pick()).collect();
        let second: String = (0..4).map(|_| pick()).collect();
        format!("{first}-{second}")
    }
}

impl std::fmt::Debug for OidcProviderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcProviderService").finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn code_with_challenge(method: Option<&str>, challenge: Option<&str>) -> AuthorizationCode {
        AuthorizationCode {
            id: Uuid::new_v4(),
            code_hash: "h".into(),
            client_id: "c".into(),
            user_id: Uuid::new_v4(),
            redirect_uri: "https://rp.example.com/cb".into(),
            scope: "openid".into(),
            code_challenge: challenge.map(String::from),
            code_challenge_method: method.map(String::from),
            nonce: None,
            used: false,
            expires_at: Utc::now() + ChronoDuration::minutes(10),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pkce_s256_roundtrip() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

        let code = code_with_challenge(Some("S256"), Some(&challenge));
        assert!(OidcProviderService::verify_pkce(&code, Some(verifier)).is_ok());
        assert!(OidcProviderService::verify_pkce(&code, Some("wrong")).is_err());
        assert!(OidcProviderService::verify_pkce(&code, None).is_err());
    }

    #[test]
    fn test_pkce_plain_roundtrip() {
        let code = code_with_challenge(Some("plain"), Some("the-verifier"));
        assert!(OidcProviderService::verify_pkce(&code, Some("the-verifier")).is_ok());
        assert!(OidcProviderService::verify_pkce(&code, Some("nope")).is_err());
    }

    #[test]
    fn test_pkce_absent_challenge_skips() {
        let code = code_with_challenge(None, None);
        assert!(OidcProviderService::verify_pkce(&code, None).is_ok());
    }

    #[test]
    fn test_user_code_shape() {
        for _ in 0..50 {
            let code = OidcProviderService::generate_user_code();
            assert_eq!(code.len(), 9);
            assert_eq!(&code[4..5], "-");
            assert!(code
                .chars()
                .filter(|c| *c != '-')
                .all(|c| USER_CODE_ALPHABET.contains(&(c as u8))));
        }
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!(
            OidcProviderService::parse_scopes("openid  email profile"),
            vec!["openid", "email", "profile"]
        );
        assert!(OidcProviderService::parse_scopes("").is_empty());
    }

    #[test]
    fn test_seeded_scopes_include_oidc_core() {
        for required in ["openid", "profile", "email", "offline_access"] {
            assert!(SEEDED_SCOPES.contains(&required));
        }
    }
}
