//! # Authentication Orchestrator
//!
//! Drives every credential flow end to end. The policy gate has already
//! run (method allowed, IP clean, request-level limits); this service
//! owns credential checks, account lockout, the 2FA step-up leg, and
//! hands completed authentications to the session engine.
//!
//! ## Flows
//!
//! ```text
//! password:      credential_check ─► [TOTP? step_up] ─► establish
//! otp login:     request_otp ─► verify_otp ─► find_or_create ─► establish
//! passwordless:  init(email) ─► otp ─► complete(code, profile) ─► establish
//! 2FA leg:       step_up token + TOTP code ─► establish
//! exchange:      access token ─► 30s one-shot code ─► redeem ─► establish
//! refresh:       rotate session row, same id
//! ```
//!
//! ## Lockout
//!
//! `K` failures within window `W` lock the account for
//! `base * 2^(failures-K)` (capped). Counters are atomic Redis
//! increments keyed by the credential identity; success resets them.
//! Tie-break: a failed TOTP code under a *valid* step-up token does NOT
//! count toward lockout, but a bad step-up token is `TokenInvalid`.
//!
//! ## Enumeration Hygiene
//!
//! Login failures are generic `InvalidCredentials`; forgot-password
//! always reports success.

use chrono::{Duration as ChronoDuration, Utc};
use shared::auth::jwt::TokenService;
use shared::auth::password::{totp, PasswordHasher, PasswordPolicy};
use shared::config::LockoutConfig;
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use shared::validation::normalize_email;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Application, NewUser, OtpType, User, WebhookEvent};
use crate::repository::{
    ApplicationRepository, AuditRecord, AuditRepository, SsoRepository,
};
use crate::service::identity_service::IdentityService;
use crate::service::otp_service::{OtpService, OtpTarget};
use crate::service::session_service::{AuthOutcome, ClientContext, SessionService};
use crate::service::webhook_service::WebhookService;

/// Pending TOTP enrollment lives this long before the user must restart.
const TOTP_ENROLL_TTL: Duration = Duration::from_secs(600);

/// A password sign-in either completes or parks at the 2FA leg.
#[derive(Debug, Clone)]
pub enum SigninResult {
    /// Tokens issued, session established.
    Complete(AuthOutcome),
    /// Account has TOTP enrolled; present the step-up token with a code.
    StepUpRequired { step_up_token: String },
}

/// Result of creating a cross-application exchange code.
#[derive(Debug, Clone)]
pub struct ExchangeCodeGrant {
    pub exchange_code: String,
    pub expires_at: chrono::DateTime<Utc>,
}

/// The orchestrator.
pub struct AuthService {
    identity: Arc<IdentityService>,
    sessions: Arc<SessionService>,
    otp: Arc<OtpService>,
    tokens: Arc<TokenService>,
    hasher: Arc<PasswordHasher>,
    password_policy: PasswordPolicy,
    redis: RedisClient,
    webhooks: Arc<WebhookService>,
    audit: AuditRepository,
    applications: ApplicationRepository,
    sso: SsoRepository,
    lockout: LockoutConfig,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<IdentityService>,
        sessions: Arc<SessionService>,
        otp: Arc<OtpService>,
        tokens: Arc<TokenService>,
        hasher: Arc<PasswordHasher>,
        password_policy: PasswordPolicy,
        redis: RedisClient,
        webhooks: Arc<WebhookService>,
        audit: AuditRepository,
        applications: ApplicationRepository,
        sso: SsoRepository,
        lockout: LockoutConfig,
    ) -> Self {
        Self {
            identity,
            sessions,
            otp,
            tokens,
            hasher,
            password_policy,
            redis,
            webhooks,
            audit,
            applications,
            sso,
            lockout,
        }
    }

    // =========================================================================
    // LOCKOUT
    // =========================================================================

    /// Rejects when the identity is currently locked.
    async fn check_lockout(&self, identity_key: &str) -> Result<(), ApiError> {
        let lock_key = format!("lock:{identity_key}");
        if let Some(until_ts) = self.redis.get::<i64>(&lock_key).await? {
            let until = chrono::DateTime::<Utc>::from_timestamp(until_ts, 0)
                .unwrap_or_else(Utc::now);
            return Err(ApiError::AccountLocked { until });
        }
        Ok(())
    }

    /// Counts a failure; locks when the threshold is crossed.
    ///
    /// Returns the error to surface: `AccountLocked` at/over the
    /// threshold, otherwise the passed-through credential error.
    async fn record_failure(&self, identity_key: &str, base_error: ApiError) -> ApiError {
        let counter_key = format!("failed:{identity_key}");
        let window = Duration::from_secs(self.lockout.window_seconds);

        let count = match self.redis.incr_window(&counter_key, window).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Lockout counter unavailable");
                return base_error;
            }
        };

        if count >= self.lockout.max_failures as i64 {
            let over = (count - self.lockout.max_failures as i64).max(0) as u32;
            let lock_seconds = self
                .lockout
                .base_seconds
                .saturating_mul(1u64 << over.min(16))
                .min(self.lockout.max_lock_seconds);

            let until = Utc::now() + ChronoDuration::seconds(lock_seconds as i64);
            let lock_key = format!("lock:{identity_key}");
            let _ = self
                .redis
                .set(&lock_key, &until.timestamp(), Some(Duration::from_secs(lock_seconds)))
                .await;

            return ApiError::AccountLocked { until };
        }

        base_error
    }

    /// Success resets the counter and any lock.
    async fn clear_failures(&self, identity_key: &str) {
        let _ = self.redis.delete(&format!("failed:{identity_key}")).await;
        let _ = self.redis.delete(&format!("lock:{identity_key}")).await;
    }

    // =========================================================================
    // PASSWORD SIGN-IN
    // =========================================================================

    /// Password flow first leg. Ban check runs before the credential
    /// check so a banned profile fails with `Banned` regardless of the
    /// password.
    pub async fn password_signin(
        &self,
        email: &str,
        password: &str,
        application: &Application,
        device_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<SigninResult, ApiError> {
        let email = normalize_email(email);
        let identity_key = format!("password:{email}");
        self.check_lockout(&identity_key).await?;

        let result = self
            .password_signin_inner(&email, password, application, device_id, client, &identity_key)
            .await;

        match &result {
            Ok(_) => {
                self.audit
                    .record(
                        AuditRecord::success("auth.password_signin")
                            .application(Some(application.id))
                            .client(client.ip_address.clone(), client.user_agent.clone()),
                    )
                    .await;
            }
            Err(e) => {
                self.audit
                    .record(
                        AuditRecord::failure("auth.password_signin", e.error_code())
                            .application(Some(application.id))
                            .client(client.ip_address.clone(), client.user_agent.clone()),
                    )
                    .await;
            }
        }

        result
    }

    async fn password_signin_inner(
        &self,
        email: &str,
        password: &str,
        application: &Application,
        device_id: Option<&str>,
        client: &ClientContext,
        identity_key: &str,
    ) -> Result<SigninResult, ApiError> {
        let user = match self.identity.users().find_by_email(email).await? {
            Some(user) => user,
            None => {
                // Same error as a wrong password: no enumeration
                warn!("Sign-in attempt for unknown email");
                return Err(self
                    .record_failure(identity_key, ApiError::InvalidCredentials)
                    .await);
            }
        };

        // Ban and activity guards run before the password check
        self.identity.guard_profile(&user, application.id).await?;

        let stored_hash = user
            .password_hash
            .as_deref()
            .ok_or(ApiError::InvalidCredentials)?;

        if !self.hasher.verify(password, stored_hash)? {
            warn!(user_id = %user.id, "Failed sign-in: wrong password");
            return Err(self
                .record_failure(identity_key, ApiError::InvalidCredentials)
                .await);
        }

        // Stored hash weaker than current policy: transparently upgrade
        if self.hasher.needs_rehash(stored_hash) {
            let upgraded = self.hasher.hash(password)?;
            self.identity.users().rehash_password(user.id, &upgraded).await?;
        }

        if let Some(expiry) = user.password_expires_at {
            if expiry <= Utc::now() {
                return Err(ApiError::BadRequest {
                    message: "password expired; reset required".to_string(),
                });
            }
        }

        self.clear_failures(identity_key).await;

        // TOTP enrolled: park at the step-up leg
        if user.two_factor_enabled() {
            let step_up_token =
                self.tokens
                    .issue_step_up(user.id, Some(application.id), "totp")?;
            return Ok(SigninResult::StepUpRequired { step_up_token });
        }

        let outcome = self
            .sessions
            .establish(&user, Some(application), device_id, client, "password")
            .await?;

        Ok(SigninResult::Complete(outcome))
    }

    /// Second leg: step-up token + TOTP code.
    ///
    /// A bad step-up token is `TokenInvalid` and counts as a failure;
    /// a TOTP mismatch under a valid token does not touch the lockout
    /// counter.
    pub async fn verify_two_factor(
        &self,
        step_up_token: &str,
        code: &str,
        device_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<AuthOutcome, ApiError> {
        let claims = self.tokens.verify_step_up(step_up_token)?;

        let user = self
            .identity
            .users()
            .find_by_id(claims.sub)
            .await?
            .ok_or(ApiError::TokenInvalid)?;

        let application = match claims.application_id {
            Some(app_id) => {
                let app = self
                    .applications
                    .find_by_id(app_id)
                    .await?
                    .ok_or(ApiError::TokenInvalid)?;
                self.identity.guard_profile(&user, app.id).await?;
                Some(app)
            }
            None => None,
        };

        let secret = user.totp_secret.as_deref().ok_or(ApiError::TokenInvalid)?;
        if !totp::verify_now(secret, code) {
            self.audit
                .record(
                    AuditRecord::failure("auth.totp_verify", "INVALID_CREDENTIALS")
                        .user(user.id)
                        .client(client.ip_address.clone(), client.user_agent.clone()),
                )
                .await;
            return Err(ApiError::InvalidCredentials);
        }

        let outcome = self
            .sessions
            .establish(&user, application.as_ref(), device_id, client, "totp")
            .await?;

        self.audit
            .record(
                AuditRecord::success("auth.totp_verify")
                    .user(user.id)
                    .client(client.ip_address.clone(), client.user_agent.clone()),
            )
            .await;

        Ok(outcome)
    }

    // =========================================================================
    // SIGNUP
    // =========================================================================

    /// Password-based registration. Enforces the password policy, then
    /// establishes the first session.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        username: Option<&str>,
        application: &Application,
        device_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<AuthOutcome, ApiError> {
        if let Err(problems) = self.password_policy.validate(password) {
            return Err(ApiError::BadRequest {
                message: problems.join("; "),
            });
        }

        let email = normalize_email(email);
        let username = match username {
            Some(name) => name.to_string(),
            None => self.identity.generate_username(&email).await?,
        };

        let password_hash = self.hasher.hash(password)?;
        let user = self
            .identity
            .create_user(NewUser {
                email: Some(email),
                phone: None,
                username,
                password_hash: Some(password_hash),
                email_verified: false,
                phone_verified: false,
            })
            .await?;

        let outcome = self
            .sessions
            .establish(&user, Some(application), device_id, client, "password")
            .await?;

        self.audit
            .record(
                AuditRecord::success("auth.signup")
                    .user(user.id)
                    .application(Some(application.id))
                    .client(client.ip_address.clone(), client.user_agent.clone()),
            )
            .await;

        Ok(outcome)
    }

    // =========================================================================
    // OTP FLOWS
    // =========================================================================

    /// Issues a login/verification code for the target.
    pub async fn send_otp(
        &self,
        target: &OtpTarget,
        otp_type: OtpType,
        application: &Application,
    ) -> Result<u64, ApiError> {
        self.otp.send(target, otp_type, &application.display_name).await
    }

    /// OTP second step shared by the login and verification flows:
    /// verify the code, create the user when absent (email seed,
    /// auto-username), establish the session.
    pub async fn verify_otp_auth(
        &self,
        target: &OtpTarget,
        code: &str,
        otp_type: OtpType,
        application: &Application,
        device_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<AuthOutcome, ApiError> {
        let identity_key = format!("otp:{}", target.email().or(target.phone()).unwrap_or(""));
        self.check_lockout(&identity_key).await?;

        if let Err(e) = self.otp.verify(target, otp_type, code).await {
            let surfaced = match e {
                // Mismatches count toward lockout; consumed/expired
                // codes do not
                ApiError::InvalidCredentials => {
                    self.record_failure(&identity_key, ApiError::InvalidCredentials)
                        .await
                }
                other => other,
            };

            self.audit
                .record(
                    AuditRecord::failure("auth.otp_verify", surfaced.error_code())
                        .application(Some(application.id))
                        .client(client.ip_address.clone(), client.user_agent.clone()),
                )
                .await;

            return Err(surfaced);
        }

        self.clear_failures(&identity_key).await;

        let user = match target {
            OtpTarget::Email(email) => {
                let user = self.identity.find_or_create_by_email(email, true).await?;
                // A verified code proves control of the address
                if !user.email_verified {
                    self.identity.mark_email_verified(user.id).await?;
                }
                user
            }
            OtpTarget::Phone(phone) => {
                let user = self.identity.find_or_create_by_phone(phone).await?;
                if !user.phone_verified {
                    self.identity.mark_phone_verified(user.id).await?;
                }
                user
            }
        };

        self.identity.guard_profile(&user, application.id).await?;

        let method = match target {
            OtpTarget::Email(_) => "otp_email",
            OtpTarget::Phone(_) => "otp_sms",
        };

        let outcome = self
            .sessions
            .establish(&user, Some(application), device_id, client, method)
            .await?;

        self.audit
            .record(
                AuditRecord::success("auth.otp_verify")
                    .user(user.id)
                    .application(Some(application.id))
                    .client(client.ip_address.clone(), client.user_agent.clone()),
            )
            .await;

        Ok(outcome)
    }

    // =========================================================================
    // PASSWORDLESS REGISTRATION
    // =========================================================================

    /// First step: send the registration code.
    pub async fn passwordless_init(
        &self,
        email: &str,
        application: &Application,
    ) -> Result<u64, ApiError> {
        let target = OtpTarget::Email(normalize_email(email));
        self.otp
            .send(&target, OtpType::Registration, &application.display_name)
            .await
    }

    /// Second step: verify the code, create the account with the given
    /// profile details, establish the session.
    ///
    /// Unlike OTP login, an existing account is a `Conflict` - this flow
    /// is registration.
    pub async fn passwordless_complete(
        &self,
        email: &str,
        code: &str,
        username: Option<&str>,
        display_name: Option<&str>,
        application: &Application,
        device_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<AuthOutcome, ApiError> {
        let email = normalize_email(email);
        let target = OtpTarget::Email(email.clone());

        self.otp.verify(&target, OtpType::Registration, code).await?;

        if self.identity.users().find_by_email(&email).await?.is_some() {
            return Err(ApiError::Conflict {
                resource: "account already registered".to_string(),
            });
        }

        let username = match username {
            Some(name) => name.to_string(),
            None => self.identity.generate_username(&email).await?,
        };

        let user = self
            .identity
            .create_user(NewUser {
                email: Some(email),
                phone: None,
                username,
                password_hash: None,
                email_verified: true,
                phone_verified: false,
            })
            .await?;

        let outcome = self
            .sessions
            .establish(&user, Some(application), device_id, client, "otp_email")
            .await?;

        if let Some(name) = display_name {
            self.identity
                .users()
                .update_profile(user.id, application.id, Some(name), None, None, None)
                .await?;
        }

        self.audit
            .record(
                AuditRecord::success("auth.passwordless_complete")
                    .user(user.id)
                    .application(Some(application.id))
                    .client(client.ip_address.clone(), client.user_agent.clone()),
            )
            .await;

        Ok(outcome)
    }

    // =========================================================================
    // REFRESH & LOGOUT
    // =========================================================================

    /// Refresh grant: rotate the session row.
    pub async fn refresh(
        &self,
        refresh_token: &str,
    ) -> Result<shared::auth::jwt::TokenPair, ApiError> {
        let (session, pair) = self.sessions.refresh(refresh_token).await?;

        self.audit
            .record(
                AuditRecord::success("auth.refresh")
                    .user(session.user_id)
                    .application(session.application_id)
                    .target(format!("session:{}", session.id)),
            )
            .await;

        Ok(pair)
    }

    /// Ends the session carrying this refresh token and blacklists the
    /// presented access token immediately.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: &str,
    ) -> Result<(), ApiError> {
        let token_hash = TokenService::hash_token(refresh_token);

        if let Some(session) = self
            .sessions
            .repository()
            .find_active_by_token_hash(&token_hash)
            .await?
        {
            self.sessions.revoke(session.id).await?;

            self.audit
                .record(
                    AuditRecord::success("auth.logout")
                        .user(session.user_id)
                        .application(session.application_id)
                        .target(format!("session:{}", session.id)),
                )
                .await;
        }

        if let Some(token) = access_token {
            let access_hash = TokenService::hash_token(token);
            let ttl = Duration::from_secs(self.tokens.config().access_token_ttl_seconds);
            if let Err(e) = self.redis.blacklist_token(&access_hash, ttl).await {
                warn!(error = %e, "Failed to blacklist access token on logout");
            }
        }

        Ok(())
    }

    // =========================================================================
    // PASSWORD MANAGEMENT
    // =========================================================================

    /// Authenticated password change. Enforces policy and the reuse
    /// history, revokes every other session and emits
    /// `password.changed`.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        let user = self
            .identity
            .users()
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("user:{user_id}"),
            })?;

        let stored = user
            .password_hash
            .as_deref()
            .ok_or(ApiError::InvalidCredentials)?;
        if !self.hasher.verify(current_password, stored)? {
            return Err(ApiError::InvalidCredentials);
        }

        self.apply_new_password(&user, new_password).await?;

        Ok(())
    }

    /// Forgot-password entry: always reports success so addresses can't
    /// be enumerated.
    pub async fn forgot_password(
        &self,
        email: &str,
        application: &Application,
    ) -> Result<(), ApiError> {
        let email = normalize_email(email);

        if self.identity.users().find_by_email(&email).await?.is_some() {
            let target = OtpTarget::Email(email);
            self.otp
                .send(&target, OtpType::PasswordReset, &application.display_name)
                .await?;
        } else {
            info!("Password reset requested for unknown email");
        }

        Ok(())
    }

    /// Completes a reset with the emailed code.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        let email = normalize_email(email);
        let target = OtpTarget::Email(email.clone());

        self.otp.verify(&target, OtpType::PasswordReset, code).await?;

        let user = self
            .identity
            .users()
            .find_by_email(&email)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        self.apply_new_password(&user, new_password).await?;

        Ok(())
    }

    /// Shared tail of both password-setting paths: policy, history
    /// check, update, revoke sessions, webhook, audit.
    async fn apply_new_password(&self, user: &User, new_password: &str) -> Result<(), ApiError> {
        if let Err(problems) = self.password_policy.validate(new_password) {
            return Err(ApiError::BadRequest {
                message: problems.join("; "),
            });
        }

        // Reject reuse of the last N passwords
        let history = self
            .identity
            .users()
            .password_history(user.id, self.password_policy.history_depth)
            .await?;
        for old_hash in history.iter().chain(user.password_hash.iter()) {
            if self.hasher.verify(new_password, old_hash)? {
                return Err(ApiError::BadRequest {
                    message: "password was used recently; choose a different one".to_string(),
                });
            }
        }

        let new_hash = self.hasher.hash(new_password)?;
        let expires_at = self
            .password_policy
            .rotation_days
            .map(|days| Utc::now() + ChronoDuration::days(days as i64));

        self.identity
            .users()
            .update_password(user.id, &new_hash, expires_at)
            .await?;

        // Every session dies with the old password
        self.sessions.revoke_all(user.id).await?;

        self.webhooks
            .emit(WebhookEvent::PasswordChanged { user_id: user.id })
            .await;

        self.audit
            .record(AuditRecord::success("auth.password_changed").user(user.id))
            .await;

        Ok(())
    }

    // =========================================================================
    // TOTP ENROLLMENT
    // =========================================================================

    /// Starts enrollment: a fresh secret parked in Redis until
    /// confirmed. Returns (secret, provisioning URI).
    pub async fn totp_enroll_begin(&self, user_id: Uuid) -> Result<(String, String), ApiError> {
        let user = self
            .identity
            .users()
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("user:{user_id}"),
            })?;

        let secret = totp::generate_secret();
        let account = user.email.as_deref().unwrap_or(&user.username);
        let uri = totp::provisioning_uri(&secret, "auth-gateway", account);

        self.redis
            .set(
                &format!("totp:pending:{user_id}"),
                &secret,
                Some(TOTP_ENROLL_TTL),
            )
            .await?;

        Ok((secret, uri))
    }

    /// Confirms enrollment with a code from the authenticator app.
    pub async fn totp_enroll_confirm(&self, user_id: Uuid, code: &str) -> Result<(), ApiError> {
        let key = format!("totp:pending:{user_id}");
        let secret: String = self
            .redis
            .get(&key)
            .await?
            .ok_or(ApiError::BadRequest {
                message: "no enrollment in progress".to_string(),
            })?;

        if !totp::verify_now(&secret, code) {
            return Err(ApiError::InvalidCredentials);
        }

        self.identity
            .users()
            .set_totp_secret(user_id, Some(&secret))
            .await?;
        let _ = self.redis.delete(&key).await;

        self.webhooks
            .emit(WebhookEvent::TwoFactorEnabled { user_id })
            .await;
        self.audit
            .record(AuditRecord::success("auth.totp_enabled").user(user_id))
            .await;

        Ok(())
    }

    /// Disables 2FA after proving possession of the current secret.
    pub async fn totp_disable(&self, user_id: Uuid, code: &str) -> Result<(), ApiError> {
        let user = self
            .identity
            .users()
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("user:{user_id}"),
            })?;

        let secret = user.totp_secret.as_deref().ok_or(ApiError::BadRequest {
            message: "two-factor is not enabled".to_string(),
        })?;

        if !totp::verify_now(secret, code) {
            return Err(ApiError::InvalidCredentials);
        }

        self.identity.users().set_totp_secret(user_id, None).await?;

        self.webhooks
            .emit(WebhookEvent::TwoFactorDisabled { user_id })
            .await;
        self.audit
            .record(AuditRecord::success("auth.totp_disabled").user(user_id))
            .await;

        Ok(())
    }

    // =========================================================================
    // CROSS-APPLICATION TOKEN EXCHANGE
    // =========================================================================

    /// Mints a one-shot exchange code for a validated access token
    /// holder. TTL is capped at 30 seconds.
    pub async fn create_exchange_code(
        &self,
        user_id: Uuid,
        source_application_id: Option<Uuid>,
        target_application_id: Uuid,
    ) -> Result<ExchangeCodeGrant, ApiError> {
        let target = self
            .applications
            .find_by_id(target_application_id)
            .await?
            .filter(|app| app.is_active)
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("application:{target_application_id}"),
            })?;

        let user = self
            .identity
            .users()
            .find_by_id(user_id)
            .await?
            .ok_or(ApiError::TokenInvalid)?;

        // The user must be admissible in the target app (profile may
        // not exist yet - it auto-creates on redemption - but a ban or
        // deactivation blocks the exchange now)
        self.identity.guard_profile(&user, target.id).await?;

        let subject = self.identity.resolve_subject(&user, Some(&target)).await?;
        let mut scope_snapshot = subject.roles;
        scope_snapshot.extend(subject.app_roles.unwrap_or_default());

        let ttl = self.tokens.config().exchange_code_ttl_seconds.min(30);
        let code = TokenService::new_opaque_token();
        let code_hash = TokenService::hash_token(&code);

        let record = self
            .sso
            .create_exchange_code(
                &code_hash,
                user.id,
                source_application_id,
                target.id,
                &scope_snapshot,
                ttl,
            )
            .await?;

        self.audit
            .record(
                AuditRecord::success("auth.exchange_code_created")
                    .user(user.id)
                    .application(Some(target.id)),
            )
            .await;

        Ok(ExchangeCodeGrant {
            exchange_code: code,
            expires_at: record.expires_at,
        })
    }

    /// Redeems an exchange code for tokens scoped to the target
    /// application. Single-use: a second redemption is `Conflict`.
    pub async fn redeem_exchange_code(
        &self,
        exchange_code: &str,
        device_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<AuthOutcome, ApiError> {
        let code_hash = TokenService::hash_token(exchange_code);

        let record = self
            .sso
            .find_exchange_code(&code_hash)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        if record.used {
            return Err(ApiError::Conflict {
                resource: "exchange code already redeemed".to_string(),
            });
        }

        if record.expires_at <= Utc::now() {
            return Err(ApiError::TokenExpired);
        }

        // Consumed redemption is irreversible; the race loser conflicts
        if !self.sso.consume_exchange_code(record.id).await? {
            return Err(ApiError::Conflict {
                resource: "exchange code already redeemed".to_string(),
            });
        }

        let user = self
            .identity
            .users()
            .find_by_id(record.user_id)
            .await?
            .ok_or(ApiError::TokenInvalid)?;

        let target = self
            .applications
            .find_by_id(record.target_application_id)
            .await?
            .ok_or(ApiError::TokenInvalid)?;

        self.identity.guard_profile(&user, target.id).await?;

        let outcome = self
            .sessions
            .establish(&user, Some(&target), device_id, client, "token_exchange")
            .await?;

        self.audit
            .record(
                AuditRecord::success("auth.exchange_code_redeemed")
                    .user(user.id)
                    .application(Some(target.id))
                    .client(client.ip_address.clone(), client.user_agent.clone()),
            )
            .await;

        Ok(outcome)
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService").finish_non_exhaustive()
    }
}
