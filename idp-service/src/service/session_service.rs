//! # Session Engine
//!
//! Refresh-token lifecycle, per-device session reuse, revocation and
//! login-alert fingerprints. Every successful authentication flow -
//! password, OTP, passwordless, OAuth, token exchange - funnels through
//! [`SessionService::establish`].
//!
//! ## Device Reuse
//!
//! ```text
//! establish(user, app, device_id, ...)
//!     │
//!     ├─ device_id present ──► rotate the unique (user, device) row
//!     │                         │ hit:  same id, new token hashes
//!     │                         └ miss: insert row with device_id
//!     │
//!     └─ device_id absent ───► always insert (gRPC callers without
//!                               x-device-id get no reuse)
//! ```
//!
//! ## Login Alerts
//!
//! The family-level fingerprint of every successful login lands in a
//! per-user Redis set with a TTL. A fingerprint seen for the first time
//! emits `user.login_alert`.

use chrono::{Duration as ChronoDuration, Utc};
use shared::auth::jwt::{TokenPair, TokenService};
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Application, Session, SessionView, User, UserView, WebhookEvent};
use crate::repository::{ApplicationRepository, SessionClient, SessionRepository};
use crate::service::device::{classify_user_agent, login_fingerprint, DeviceInfo};
use crate::service::identity_service::IdentityService;
use crate::service::webhook_service::WebhookService;

/// How long a fingerprint stays "known". Refreshed on every sighting.
const FINGERPRINT_TTL: Duration = Duration::from_secs(90 * 24 * 3600);

/// What the transport layer knows about the caller.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Result of a completed authentication.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub tokens: TokenPair,
    pub user: UserView,
    pub session_id: Uuid,
}

/// Service for session lifecycle operations.
#[derive(Clone)]
pub struct SessionService {
    sessions: SessionRepository,
    applications: ApplicationRepository,
    redis: RedisClient,
    identity: Arc<IdentityService>,
    tokens: Arc<TokenService>,
    webhooks: Arc<WebhookService>,
}

impl SessionService {
    pub fn new(
        sessions: SessionRepository,
        applications: ApplicationRepository,
        redis: RedisClient,
        identity: Arc<IdentityService>,
        tokens: Arc<TokenService>,
        webhooks: Arc<WebhookService>,
    ) -> Self {
        Self {
            sessions,
            applications,
            redis,
            identity,
            tokens,
            webhooks,
        }
    }

    pub fn repository(&self) -> &SessionRepository {
        &self.sessions
    }

    // =========================================================================
    // ESTABLISH
    // =========================================================================

    /// Completes an authentication: profile touch, role resolution,
    /// token issuance, session upsert, login alert and `user.login`.
    ///
    /// The credential has already been checked by the orchestrator; this
    /// is the common tail of every flow.
    pub async fn establish(
        &self,
        user: &User,
        application: Option<&Application>,
        device_id: Option<&str>,
        client: &ClientContext,
        method: &str,
    ) -> Result<AuthOutcome, ApiError> {
        // Profile touch (creates on first auth into the application)
        if let Some(app) = application {
            self.identity.ensure_profile(user.id, app.id).await?;
        }

        let subject = self.identity.resolve_subject(user, application).await?;
        let pair = self.tokens.issue_pair(&subject)?;

        let token_hash = TokenService::hash_token(&pair.refresh_token);
        let access_token_hash = TokenService::hash_token(&pair.access_token);
        let expires_at = Utc::now() + ChronoDuration::seconds(pair.refresh_expires_in);

        let device_info = client
            .user_agent
            .as_deref()
            .map(classify_user_agent)
            .unwrap_or_default();

        let session_client = SessionClient {
            device_fingerprint: Some(login_fingerprint(&device_info)),
            device_type: device_info.device_type.clone(),
            device_os: device_info.os_family.clone(),
            device_browser: device_info.browser_family.clone(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            session_name: None,
        };

        let app_id = application.map(|a| a.id);

        // Device reuse: mutate the unique (user, device) row when there
        // is one, insert otherwise. Empty device id never reuses.
        let session = match device_id.filter(|d| !d.is_empty()) {
            Some(device) => {
                let rotated = self
                    .sessions
                    .rotate_device_session(
                        user.id,
                        app_id,
                        device,
                        &token_hash,
                        &access_token_hash,
                        expires_at,
                        &session_client,
                    )
                    .await?;

                match rotated {
                    Some(session) => session,
                    None => {
                        self.sessions
                            .insert(
                                user.id,
                                app_id,
                                Some(device),
                                &token_hash,
                                &access_token_hash,
                                expires_at,
                                &session_client,
                            )
                            .await?
                    }
                }
            }
            None => {
                self.sessions
                    .insert(
                        user.id,
                        app_id,
                        None,
                        &token_hash,
                        &access_token_hash,
                        expires_at,
                        &session_client,
                    )
                    .await?
            }
        };

        self.identity.users().update_last_login(user.id).await?;

        self.alert_on_new_fingerprint(user.id, app_id, &device_info, client)
            .await;

        info!(
            user_id = %user.id,
            session_id = %session.id,
            method = %method,
            device_reused = device_id.is_some(),
            "Authentication completed"
        );

        self.webhooks
            .emit(WebhookEvent::UserLogin {
                user_id: user.id,
                application_id: app_id,
                method: method.to_string(),
                ip_address: client.ip_address.clone(),
            })
            .await;

        Ok(AuthOutcome {
            tokens: pair,
            user: user.clone().into(),
            session_id: session.id,
        })
    }

    /// Emits `user.login_alert` the first time a fingerprint is seen
    /// for this user. Redis failures only cost the alert.
    async fn alert_on_new_fingerprint(
        &self,
        user_id: Uuid,
        application_id: Option<Uuid>,
        device_info: &DeviceInfo,
        client: &ClientContext,
    ) {
        let fingerprint = login_fingerprint(device_info);
        let key = format!("fingerprints:{user_id}");

        match self.redis.add_to_set(&key, &fingerprint, FINGERPRINT_TTL).await {
            Ok(true) => {
                self.webhooks
                    .emit(WebhookEvent::UserLoginAlert {
                        user_id,
                        application_id,
                        device_type: device_info.device_type.clone(),
                        device_os: device_info.os_family.clone(),
                        device_browser: device_info.browser_family.clone(),
                        ip_address: client.ip_address.clone(),
                    })
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Fingerprint tracking unavailable; skipping login alert");
            }
        }
    }

    // =========================================================================
    // REFRESH
    // =========================================================================

    /// Rotates a session found by refresh-token hash: new pair, same
    /// row. Returns the session alongside so the caller can load the
    /// user.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(Session, TokenPair), ApiError> {
        let token_hash = TokenService::hash_token(refresh_token);

        let session = self
            .sessions
            .find_active_by_token_hash(&token_hash)
            .await?
            .ok_or(ApiError::TokenInvalid)?;

        let user = self
            .identity
            .users()
            .find_by_id(session.user_id)
            .await?
            .ok_or(ApiError::TokenInvalid)?;

        if !user.is_active {
            return Err(ApiError::AccessDenied);
        }

        // Rebuild the subject so role changes land in the new token
        let application = match session.application_id {
            Some(app_id) => self.applications.find_by_id(app_id).await?,
            None => None,
        };

        let subject = self
            .identity
            .resolve_subject(&user, application.as_ref())
            .await?;

        let pair = self.tokens.issue_pair(&subject)?;
        let new_hash = TokenService::hash_token(&pair.refresh_token);
        let new_access_hash = TokenService::hash_token(&pair.access_token);
        let expires_at = Utc::now() + ChronoDuration::seconds(pair.refresh_expires_in);

        let rotated = self
            .sessions
            .rotate_session_tokens(session.id, &new_hash, &new_access_hash, expires_at)
            .await?
            // Lost a race with revocation
            .ok_or(ApiError::TokenRevoked)?;

        info!(user_id = %user.id, session_id = %rotated.id, "Refresh token rotated");

        Ok((rotated, pair))
    }

    // =========================================================================
    // REVOCATION & LISTING
    // =========================================================================

    /// Revokes one session and blacklists its access token for the rest
    /// of its lifetime, making revocation immediate.
    pub async fn revoke(&self, session_id: Uuid) -> Result<(), ApiError> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("session:{session_id}"),
            })?;

        if self.sessions.revoke(session_id).await? {
            self.blacklist_access_hash(&session.access_token_hash).await;
        }

        Ok(())
    }

    /// Atomically revokes every session for a (user, device) pair.
    pub async fn revoke_by_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<u64, ApiError> {
        // Capture hashes first so the blacklist covers all of them
        let active = self.sessions.list_active(user_id).await?;
        let count = self.sessions.revoke_by_device(user_id, device_id).await?;

        for session in active
            .iter()
            .filter(|s| s.device_id.as_deref() == Some(device_id))
        {
            self.blacklist_access_hash(&session.access_token_hash).await;
        }

        Ok(count)
    }

    /// Revokes every session for a user.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, ApiError> {
        let active = self.sessions.list_active(user_id).await?;
        let count = self.sessions.revoke_all(user_id).await?;

        for session in &active {
            self.blacklist_access_hash(&session.access_token_hash).await;
        }

        Ok(count)
    }

    /// All active sessions for the session-management endpoints.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<SessionView>, ApiError> {
        let sessions = self.sessions.list_active(user_id).await?;
        Ok(sessions.into_iter().map(SessionView::from).collect())
    }

    /// Verify-path check: does this access-token hash belong to a live
    /// session? Exposed to the policy gate.
    pub async fn access_token_live(&self, access_token_hash: &str) -> Result<bool, ApiError> {
        self.sessions.access_token_live(access_token_hash).await
    }

    async fn blacklist_access_hash(&self, access_token_hash: &str) {
        let ttl = Duration::from_secs(self.tokens.config().access_token_ttl_seconds);
        if let Err(e) = self.redis.blacklist_token(access_token_hash, ttl).await {
            tracing::warn!(error = %e, "Failed to blacklist access token");
        }
    }
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService").finish_non_exhaustive()
    }
}
