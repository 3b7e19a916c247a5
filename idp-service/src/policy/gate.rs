//! # Request Policy Enforcement
//!
//! A linear list of gate checks, each returning `continue` or a terminal
//! error - no framework-magic middleware registration. Both transports
//! call [`PolicyGate::authenticate`] with whatever credentials and
//! context they extracted, and get back a [`RequestContext`] the
//! handlers pass down explicitly.
//!
//! ## Credential Resolution
//!
//! Prefix detection runs before JWT parsing because all three credential
//! kinds can arrive in the same `Authorization` header:
//!
//! | Prefix | Kind | Verification |
//! |--------|------|--------------|
//! | `agw_` | API key | hash match, active, not expired (+scope per call) |
//! | `app_` | application secret | hash match, application active |
//! | other | Bearer JWT | signature valid, not blacklisted, session live |
//!
//! ## Application Cross-Check
//!
//! When a token/key carries an application binding AND the request
//! states `X-Application-ID`, the two must agree; a mismatch is rejected
//! with `AccessDenied` - neither side wins.

use shared::auth::api_key::{self, ApiScope, CredentialKind};
use shared::auth::jwt::{AccessClaims, TokenService};
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Application, AuthMethod, IpFilter};
use crate::repository::ApplicationRepository;
use crate::service::session_service::{ClientContext, SessionService};

/// General per-IP request ceiling.
const REQUESTS_PER_MINUTE_PER_IP: i64 = 300;
/// Unauthenticated credential attempts per IP are tighter.
const AUTH_ATTEMPTS_PER_MINUTE_PER_IP: i64 = 30;

// =============================================================================
// CALLER & CONTEXT
// =============================================================================

/// The verified credential behind a request.
#[derive(Debug, Clone)]
pub enum Caller {
    /// End user via bearer access token
    User(AccessClaims),
    /// Server-to-server API key
    ApiKey(crate::domain::ApiKey),
    /// Product backend via application secret
    Application(Application),
}

impl Caller {
    /// The user behind the request, when there is one.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User(claims) => Some(claims.sub),
            _ => None,
        }
    }

    /// The application the credential itself is bound to.
    pub fn bound_application(&self) -> Option<Uuid> {
        match self {
            Self::User(claims) => claims.application_id,
            Self::ApiKey(key) => key.application_id,
            Self::Application(app) => Some(app.id),
        }
    }

    /// Scope check by caller kind: API keys carry explicit scopes,
    /// application secrets are implicitly scoped to their own tenant,
    /// users need the global `admin` role for administrative scopes.
    pub fn has_scope(&self, scope: ApiScope) -> bool {
        match self {
            Self::ApiKey(key) => key.has_scope(scope.as_str()),
            Self::Application(_) => true,
            Self::User(claims) => claims.roles.iter().any(|r| r == "admin"),
        }
    }
}

/// Explicit per-request context: caller, effective application, client
/// facts. Passed as a parameter; nothing hides in framework state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub caller: Caller,
    /// The application this request operates on, fully loaded
    pub application: Option<Application>,
    pub client: ClientContext,
    pub device_id: Option<String>,
}

impl RequestContext {
    /// The application or a `BadRequest` - for routes that require one.
    pub fn require_application(&self) -> Result<&Application, ApiError> {
        self.application.as_ref().ok_or(ApiError::BadRequest {
            message: "X-Application-ID is required for this operation".to_string(),
        })
    }

    /// The authenticated user's id or `MissingAuth`.
    pub fn require_user(&self) -> Result<&AccessClaims, ApiError> {
        match &self.caller {
            Caller::User(claims) => Ok(claims),
            _ => Err(ApiError::MissingAuth),
        }
    }
}

// =============================================================================
// GATE
// =============================================================================

/// The policy gate service.
pub struct PolicyGate {
    tokens: Arc<TokenService>,
    sessions: Arc<SessionService>,
    applications: ApplicationRepository,
    redis: RedisClient,
}

impl PolicyGate {
    pub fn new(
        tokens: Arc<TokenService>,
        sessions: Arc<SessionService>,
        applications: ApplicationRepository,
        redis: RedisClient,
    ) -> Self {
        Self {
            tokens,
            sessions,
            applications,
            redis,
        }
    }

    // =========================================================================
    // PIPELINE
    // =========================================================================

    /// Runs the full gate pipeline for a protected route.
    ///
    /// `credential` is the raw value from `Authorization` (without the
    /// `Bearer ` prefix), `X-API-Key` or `X-Application-Secret`;
    /// `stated_application` is `X-Application-ID` when present.
    pub async fn authenticate(
        &self,
        credential: Option<&str>,
        stated_application: Option<Uuid>,
        client: &ClientContext,
        device_id: Option<String>,
    ) -> Result<RequestContext, ApiError> {
        self.check_ip_rate(client, "request", REQUESTS_PER_MINUTE_PER_IP)
            .await?;

        let raw = credential.ok_or(ApiError::MissingAuth)?;

        let caller = match CredentialKind::detect(raw) {
            CredentialKind::ApiKey(key) => self.verify_api_key(&key).await?,
            CredentialKind::AppSecret(secret) => self.verify_app_secret(&secret).await?,
            CredentialKind::BearerJwt(token) => Caller::User(self.verify_user_token(&token).await?),
        };

        let application = self
            .resolve_application(&caller, stated_application)
            .await?;

        if let Some(app) = &application {
            self.check_ip_filters(app.id, client).await?;
        }

        Ok(RequestContext {
            caller,
            application,
            client: client.clone(),
            device_id,
        })
    }

    /// Gate for public auth routes (signin, OTP send): no credential
    /// yet, but the application, IP filters and the tighter
    /// unauthenticated rate limit still apply.
    pub async fn public_context(
        &self,
        application_id: Uuid,
        client: &ClientContext,
    ) -> Result<Application, ApiError> {
        self.check_ip_rate(client, "auth", AUTH_ATTEMPTS_PER_MINUTE_PER_IP)
            .await?;

        let application = self
            .applications
            .find_by_id(application_id)
            .await?
            .filter(|app| app.is_active)
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("application:{application_id}"),
            })?;

        self.check_ip_filters(application.id, client).await?;

        Ok(application)
    }

    // =========================================================================
    // CREDENTIAL VERIFICATION
    // =========================================================================

    /// Full access-token verification contract: signature, expiry with
    /// skew, blacklist, then the live-session check that makes
    /// revocation immediate.
    pub async fn verify_user_token(&self, token: &str) -> Result<AccessClaims, ApiError> {
        let claims = self.tokens.verify_access(token)?;

        let access_hash = TokenService::hash_token(token);

        if self.redis.is_token_blacklisted(&access_hash).await? {
            return Err(ApiError::TokenBlacklisted);
        }

        if !self.sessions.access_token_live(&access_hash).await? {
            return Err(ApiError::TokenRevoked);
        }

        Ok(claims)
    }

    async fn verify_api_key(&self, raw: &str) -> Result<Caller, ApiError> {
        let hash = api_key::hash_credential(raw);

        let key = self
            .applications
            .find_api_key(&hash)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        if !key.is_valid_now() {
            return Err(ApiError::InvalidCredentials);
        }

        // Usage stamp is best-effort
        if let Err(e) = self.applications.touch_api_key(key.id).await {
            warn!(error = %e, "Failed to stamp API key usage");
        }

        Ok(Caller::ApiKey(key))
    }

    async fn verify_app_secret(&self, raw: &str) -> Result<Caller, ApiError> {
        let hash = api_key::hash_credential(raw);

        let application = self
            .applications
            .find_by_secret_hash(&hash)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        Ok(Caller::Application(application))
    }

    // =========================================================================
    // APPLICATION RESOLUTION
    // =========================================================================

    /// Cross-checks the credential's application binding against the
    /// stated `X-Application-ID` and loads the effective application.
    async fn resolve_application(
        &self,
        caller: &Caller,
        stated: Option<Uuid>,
    ) -> Result<Option<Application>, ApiError> {
        let bound = caller.bound_application();

        let effective = match (bound, stated) {
            // A disagreement is rejected outright; neither side wins
            (Some(b), Some(s)) if b != s => {
                warn!(bound = %b, stated = %s, "Application cross-check failed");
                return Err(ApiError::AccessDenied);
            }
            (Some(b), _) => Some(b),
            (None, Some(s)) => Some(s),
            (None, None) => None,
        };

        match effective {
            // The app-secret caller already carries the loaded row
            Some(id) => {
                if let Caller::Application(app) = caller {
                    if app.id == id {
                        return Ok(Some(app.clone()));
                    }
                }

                let app = self
                    .applications
                    .find_by_id(id)
                    .await?
                    .filter(|a| a.is_active)
                    .ok_or_else(|| ApiError::NotFound {
                        resource: format!("application:{id}"),
                    })?;
                Ok(Some(app))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // METHOD / SCOPE CHECKS
    // =========================================================================

    /// Check 4a: the invoked flow must be on the application's
    /// whitelist.
    pub fn require_method(application: &Application, method: AuthMethod) -> Result<(), ApiError> {
        if application.allows_method(method) {
            Ok(())
        } else {
            Err(ApiError::MethodNotAllowed {
                method: method.as_str().to_string(),
            })
        }
    }

    /// Check 4b: gRPC scope - the key must carry the scope AND the
    /// bound application must allow granting it.
    pub fn require_scope(ctx: &RequestContext, scope: ApiScope) -> Result<(), ApiError> {
        if !ctx.caller.has_scope(scope) {
            return Err(ApiError::InsufficientScope {
                required: scope.as_str().to_string(),
            });
        }

        if let (Caller::ApiKey(_), Some(app)) = (&ctx.caller, &ctx.application) {
            if !app.allows_scope(scope.as_str()) {
                return Err(ApiError::InsufficientScope {
                    required: scope.as_str().to_string(),
                });
            }
        }

        Ok(())
    }

    // =========================================================================
    // IP FILTERS
    // =========================================================================

    /// Check 5: blacklist blocks outright; if any whitelist entry exists
    /// for the scope, the caller IP must match one.
    async fn check_ip_filters(
        &self,
        application_id: Uuid,
        client: &ClientContext,
    ) -> Result<(), ApiError> {
        let filters = self
            .applications
            .list_ip_filters(Some(application_id))
            .await?;

        if filters.is_empty() {
            return Ok(());
        }

        let ip: IpAddr = match client.ip_address.as_deref().and_then(|s| s.parse().ok()) {
            Some(ip) => ip,
            // Unparseable/missing IPs pass the blacklist but fail any
            // whitelist
            None => {
                if filters.iter().any(|f| f.filter_type == "whitelist") {
                    return Err(ApiError::IpBlocked);
                }
                return Ok(());
            }
        };

        evaluate_ip_filters(&filters, ip)
    }

    // =========================================================================
    // RATE LIMITS
    // =========================================================================

    async fn check_ip_rate(
        &self,
        client: &ClientContext,
        action: &str,
        limit: i64,
    ) -> Result<(), ApiError> {
        let ip = match client.ip_address.as_deref() {
            Some(ip) => ip,
            None => return Ok(()),
        };

        let key = format!("rl:ip:{ip}:{action}");
        let count = self
            .redis
            .incr_window(&key, Duration::from_secs(60))
            .await?;

        if count > limit {
            let retry = self.redis.ttl_seconds(&key).await?.unwrap_or(60);
            return Err(ApiError::RateLimited {
                retry_after_seconds: retry,
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for PolicyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyGate").finish_non_exhaustive()
    }
}

// =============================================================================
// IP MATCHING
// =============================================================================

/// Evaluates the filter list for one IP: any blacklist hit blocks; when
/// whitelists exist, one must match.
fn evaluate_ip_filters(filters: &[IpFilter], ip: IpAddr) -> Result<(), ApiError> {
    for filter in filters.iter().filter(|f| f.filter_type == "blacklist") {
        if cidr_contains(&filter.cidr, ip) {
            return Err(ApiError::IpBlocked);
        }
    }

    let whitelists: Vec<_> = filters
        .iter()
        .filter(|f| f.filter_type == "whitelist")
        .collect();

    if !whitelists.is_empty() && !whitelists.iter().any(|f| cidr_contains(&f.cidr, ip)) {
        return Err(ApiError::IpBlocked);
    }

    Ok(())
}

/// Matches an IP against a plain address or CIDR block (v4 or v6).
/// Malformed rules never match.
fn cidr_contains(rule: &str, ip: IpAddr) -> bool {
    match rule.split_once('/') {
        None => rule.parse::<IpAddr>().map(|r| r == ip).unwrap_or(false),
        Some((base, len)) => {
            let (Ok(base), Ok(len)) = (base.parse::<IpAddr>(), len.parse::<u32>()) else {
                return false;
            };

            match (base, ip) {
                (IpAddr::V4(base), IpAddr::V4(ip)) => {
                    if len > 32 {
                        return false;
                    }
                    if len == 0 {
                        return true;
                    }
                    let mask = u32::MAX << (32 - len);
                    (u32::from(base) & mask) == (u32::from(ip) & mask)
                }
                (IpAddr::V6(base), IpAddr::V6(ip)) => {
                    if len > 128 {
                        return false;
                    }
                    if len == 0 {
                        return true;
                    }
                    let mask = u128::MAX << (128 - len);
                    (u128::from(base) & mask) == (u128::from(ip) & mask)
                }
                _ => false,
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn filter(cidr: &str, kind: &str) -> IpFilter {
        IpFilter {
            id: Uuid::new_v4(),
            application_id: None,
            cidr: cidr.to_string(),
            filter_type: kind.to_string(),
            description: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_cidr_matching_v4() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();

        assert!(cidr_contains("10.0.0.0/8", ip));
        assert!(cidr_contains("10.1.2.3", ip));
        assert!(cidr_contains("10.1.2.0/24", ip));
        assert!(!cidr_contains("10.1.3.0/24", ip));
        assert!(!cidr_contains("192.168.0.0/16", ip));
        assert!(cidr_contains("0.0.0.0/0", ip));
    }

    #[test]
    fn test_cidr_matching_v6() {
        let ip: IpAddr = "2001:db8::1".parse().unwrap();

        assert!(cidr_contains("2001:db8::/32", ip));
        assert!(!cidr_contains("2001:db9::/32", ip));
        // Family mismatch never matches
        assert!(!cidr_contains("10.0.0.0/8", ip));
    }

    #[test]
    fn test_malformed_rules_never_match() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert!(!cidr_contains("not-an-ip", ip));
        assert!(!cidr_contains("10.0.0.0/99", ip));
        assert!(!cidr_contains("10.0.0.0/x", ip));
    }

    #[test]
    fn test_blacklist_blocks() {
        let filters = vec![filter("10.0.0.0/8", "blacklist")];
        let blocked: IpAddr = "10.1.2.3".parse().unwrap();
        let allowed: IpAddr = "192.168.1.1".parse().unwrap();

        assert!(matches!(
            evaluate_ip_filters(&filters, blocked),
            Err(ApiError::IpBlocked)
        ));
        assert!(evaluate_ip_filters(&filters, allowed).is_ok());
    }

    #[test]
    fn test_whitelist_requires_match() {
        let filters = vec![filter("192.168.0.0/16", "whitelist")];
        let inside: IpAddr = "192.168.1.1".parse().unwrap();
        let outside: IpAddr = "10.1.2.3".parse().unwrap();

        assert!(evaluate_ip_filters(&filters, inside).is_ok());
        assert!(matches!(
            evaluate_ip_filters(&filters, outside),
            Err(ApiError::IpBlocked)
        ));
    }

    #[test]
    fn test_blacklist_wins_over_whitelist() {
        let filters = vec![
            filter("192.168.0.0/16", "whitelist"),
            filter("192.168.1.1", "blacklist"),
        ];
        let ip: IpAddr = "192.168.1.1".parse().unwrap();

        assert!(matches!(
            evaluate_ip_filters(&filters, ip),
            Err(ApiError::IpBlocked)
        ));
    }

    #[test]
    fn test_caller_scope_semantics() {
        let key = crate::domain::ApiKey {
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

        let caller = Caller::ApiKey(key);
        assert!(caller.has_scope(ApiScope::UsersRead));
        assert!(!caller.has_scope(ApiScope::EmailSend));
    }
}
