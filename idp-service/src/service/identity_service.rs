//! # Identity Core
//!
//! User and per-application profile lifecycle, role resolution and the
//! user-sync pull.
//!
//! ## Role Resolution
//!
//! A request's effective roles are the union of:
//! - global roles held by the user (`roles` with NULL application)
//! - application roles from `user_roles` scoped to the application
//! - the profile's ordered `app_roles` list
//!
//! Permissions materialize on read through
//! `Role × RolePermission × Permission`, cached in Redis with a short
//! TTL and invalidated on any role or permission write.
//!
//! ## Ban Semantics
//!
//! A banned profile short-circuits authentication with `Banned` even
//! when credentials are correct; a globally inactive user is a distinct
//! failure. The orchestrator relies on [`IdentityService::guard_profile`]
//! for the former check.

use shared::auth::jwt::TokenSubject;
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use shared::validation::normalize_email;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    Application, NewUser, Permission, User, UserApplicationProfile, WebhookEvent,
};
use crate::repository::{RoleRepository, UserRepository};
use crate::service::webhook_service::WebhookService;

/// Permission cache TTL. Short on purpose: role edits must propagate
/// quickly even if an invalidation is missed.
const PERMISSION_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default app-roles granted when a profile is created on first auth.
const DEFAULT_APP_ROLES: &[&str] = &["member"];

/// Service for the unified identity model.
#[derive(Clone)]
pub struct IdentityService {
    users: UserRepository,
    roles: RoleRepository,
    redis: RedisClient,
    webhooks: Arc<WebhookService>,
}

impl IdentityService {
    pub fn new(
        users: UserRepository,
        roles: RoleRepository,
        redis: RedisClient,
        webhooks: Arc<WebhookService>,
    ) -> Self {
        Self {
            users,
            roles,
            redis,
            webhooks,
        }
    }

    /// Repository access for flows that need raw user reads.
    pub fn users(&self) -> &UserRepository {
        &self.users
    }

    // =========================================================================
    // USER LIFECYCLE
    // =========================================================================

    /// Creates a user, normalizing the email and enforcing the
    /// "at least one of email/phone" invariant. Emits `user.created`.
    pub async fn create_user(&self, mut new_user: NewUser) -> Result<User, ApiError> {
        if new_user.email.is_none() && new_user.phone.is_none() {
            return Err(ApiError::BadRequest {
                message: "either email or phone is required".to_string(),
            });
        }

        if let Some(email) = &new_user.email {
            new_user.email = Some(normalize_email(email));
        }

        let user = self.users.create(new_user).await?;

        info!(user_id = %user.id, username = %user.username, "User created");

        self.webhooks
            .emit(WebhookEvent::UserCreated {
                user_id: user.id,
                email: user.email.clone(),
                phone: user.phone.clone(),
                username: user.username.clone(),
            })
            .await;

        Ok(user)
    }

    /// Finds an existing user by email or creates one seeded from it
    /// (OTP login, passwordless registration, OAuth sign-in).
    pub async fn find_or_create_by_email(
        &self,
        email: &str,
        email_verified: bool,
    ) -> Result<User, ApiError> {
        let email = normalize_email(email);

        if let Some(user) = self.users.find_by_email(&email).await? {
            return Ok(user);
        }

        let username = self.generate_username(&email).await?;
        self.create_user(NewUser {
            email: Some(email),
            phone: None,
            username,
            password_hash: None,
            email_verified,
            phone_verified: false,
        })
        .await
    }

    /// Same seed path for phone targets.
    pub async fn find_or_create_by_phone(&self, phone: &str) -> Result<User, ApiError> {
        if let Some(user) = self.users.find_by_phone(phone).await? {
            return Ok(user);
        }

        // Seed a username from the tail digits
        let tail: String = phone.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        let username = self.generate_username(&format!("user{tail}@phone")).await?;
        self.create_user(NewUser {
            email: None,
            phone: Some(phone.to_string()),
            username,
            password_hash: None,
            email_verified: false,
            phone_verified: true,
        })
        .await
    }

    /// Derives a unique username from an email seed: the local part,
    /// lowercased and stripped to `[a-z0-9_]`, with a random suffix when
    /// taken.
    pub async fn generate_username(&self, email_seed: &str) -> Result<String, ApiError> {
        let local = email_seed.split('@').next().unwrap_or("user");
        let base: String = local
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .take(24)
            .collect();
        let base = if base.is_empty() { "user".to_string() } else { base };

        if !self.users.username_exists(&base).await? {
            return Ok(base);
        }

        // Collisions get a short random suffix; a handful of tries is
        // plenty at 16^4 variants
        use rand::Rng as _;
        for _ in 0..5 {
            let suffix: u16 = rand::thread_rng().gen();
            let candidate = format!("{base}_{suffix:04x}");
            if !self.users.username_exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        Ok(format!("{base}_{}", Uuid::new_v4().simple()))
    }

    /// Marks the email verified and publishes the updated user.
    pub async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.users.set_email_verified(user_id).await?;
        self.emit_user_updated(user_id).await;
        Ok(())
    }

    /// Marks the phone verified and publishes the updated user.
    pub async fn mark_phone_verified(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.users.set_phone_verified(user_id).await?;
        self.emit_user_updated(user_id).await;
        Ok(())
    }

    async fn emit_user_updated(&self, user_id: Uuid) {
        if let Ok(Some(user)) = self.users.find_by_id(user_id).await {
            self.webhooks
                .emit(WebhookEvent::UserUpdated {
                    user_id: user.id,
                    email: user.email,
                    phone: user.phone,
                    username: user.username,
                    is_active: user.is_active,
                })
                .await;
        }
    }

    /// Deactivates a user globally and emits `user.deactivated`.
    pub async fn deactivate_user(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.users.set_active(user_id, false).await?;
        self.webhooks
            .emit(WebhookEvent::UserDeactivated { user_id })
            .await;
        Ok(())
    }

    /// Soft deletes a user and emits `user.deleted`.
    ///
    /// Hard deletion does not exist in the write paths; products treat
    /// this event as the terminal signal for their shadow rows.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.users.soft_delete(user_id).await?;
        self.webhooks.emit(WebhookEvent::UserDeleted { user_id }).await;
        Ok(())
    }

    // =========================================================================
    // PROFILES
    // =========================================================================

    /// Guard used by every auth flow: the user must be globally active,
    /// and must not be banned in the target application.
    ///
    /// Distinct failures: globally inactive surfaces as `AccessDenied`,
    /// a ban as `Banned` with the recorded reason.
    pub async fn guard_profile(
        &self,
        user: &User,
        application_id: Uuid,
    ) -> Result<Option<UserApplicationProfile>, ApiError> {
        if !user.is_active {
            return Err(ApiError::AccessDenied);
        }

        let profile = self.users.find_profile(user.id, application_id).await?;

        if let Some(profile) = &profile {
            if profile.is_banned {
                return Err(ApiError::Banned {
                    reason: profile.ban_reason.clone(),
                });
            }
        }

        Ok(profile)
    }

    /// Idempotent find-or-create of the profile edge, run after the
    /// credential check succeeds. Creation emits `profile.updated` so
    /// shadow tables pick up the new membership.
    pub async fn ensure_profile(
        &self,
        user_id: Uuid,
        application_id: Uuid,
    ) -> Result<UserApplicationProfile, ApiError> {
        let existed = self.users.find_profile(user_id, application_id).await?.is_some();

        let default_roles: Vec<String> =
            DEFAULT_APP_ROLES.iter().map(|r| r.to_string()).collect();
        let profile = self
            .users
            .touch_or_create_profile(user_id, application_id, &default_roles)
            .await?;

        if !existed {
            info!(user_id = %user_id, application_id = %application_id, "Profile created on first auth");
            self.webhooks
                .emit(WebhookEvent::ProfileUpdated {
                    user_id,
                    application_id,
                    app_roles: profile.app_roles.clone(),
                    is_banned: profile.is_banned,
                })
                .await;
        }

        Ok(profile)
    }

    /// Bans a profile; auth into the application short-circuits from now
    /// on. Emits `profile.updated`.
    pub async fn ban_profile(
        &self,
        user_id: Uuid,
        application_id: Uuid,
        reason: Option<&str>,
        banned_by: Option<Uuid>,
    ) -> Result<(), ApiError> {
        self.users
            .ban_profile(user_id, application_id, reason, banned_by)
            .await?;
        self.invalidate_permission_cache(user_id, Some(application_id))
            .await;

        let profile = self
            .users
            .find_profile(user_id, application_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("profile:{user_id}:{application_id}"),
            })?;

        self.webhooks
            .emit(WebhookEvent::ProfileUpdated {
                user_id,
                application_id,
                app_roles: profile.app_roles,
                is_banned: true,
            })
            .await;

        Ok(())
    }

    /// Replaces a profile's app-role list and emits `profile.updated`.
    pub async fn set_profile_app_roles(
        &self,
        user_id: Uuid,
        application_id: Uuid,
        app_roles: &[String],
    ) -> Result<(), ApiError> {
        self.users
            .set_profile_roles(user_id, application_id, app_roles)
            .await?;
        self.invalidate_permission_cache(user_id, Some(application_id))
            .await;

        if let Some(profile) = self.users.find_profile(user_id, application_id).await? {
            self.webhooks
                .emit(WebhookEvent::ProfileUpdated {
                    user_id,
                    application_id,
                    app_roles: profile.app_roles,
                    is_banned: profile.is_banned,
                })
                .await;
        }

        Ok(())
    }

    /// Lifts a ban and emits `profile.updated`.
    pub async fn unban_profile(&self, user_id: Uuid, application_id: Uuid) -> Result<(), ApiError> {
        self.users.unban_profile(user_id, application_id).await?;
        self.invalidate_permission_cache(user_id, Some(application_id))
            .await;

        if let Some(profile) = self.users.find_profile(user_id, application_id).await? {
            self.webhooks
                .emit(WebhookEvent::ProfileUpdated {
                    user_id,
                    application_id,
                    app_roles: profile.app_roles,
                    is_banned: false,
                })
                .await;
        }

        Ok(())
    }

    // =========================================================================
    // ROLE RESOLUTION
    // =========================================================================

    /// Builds the token subject for a user in an optional application
    /// scope: global roles, plus profile app-roles unioned with
    /// user_roles-sourced application roles.
    pub async fn resolve_subject(
        &self,
        user: &User,
        application: Option<&Application>,
    ) -> Result<TokenSubject, ApiError> {
        let roles = self.roles.global_role_names(user.id).await?;

        let app_roles = match application {
            Some(app) => {
                let mut names = self.roles.app_role_names(user.id, app.id).await?;
                if let Some(profile) = self.users.find_profile(user.id, app.id).await? {
                    for role in profile.app_roles {
                        if !names.contains(&role) {
                            names.push(role);
                        }
                    }
                }
                Some(names)
            }
            None => None,
        };

        Ok(TokenSubject {
            user_id: user.id,
            email: user.email.clone().unwrap_or_default(),
            username: user.username.clone(),
            roles,
            app_roles,
            application_id: application.map(|a| a.id),
            is_active: user.is_active,
            email_verified: user.email_verified,
        })
    }

    /// Effective permissions for a user in an application scope,
    /// materialized on read and cached briefly.
    pub async fn permissions(
        &self,
        user: &User,
        application: Option<&Application>,
    ) -> Result<Vec<Permission>, ApiError> {
        let app_id = application.map(|a| a.id);
        let cache_key = permission_cache_key(user.id, app_id);

        if let Some(cached) = self.redis.get::<Vec<Permission>>(&cache_key).await? {
            return Ok(cached);
        }

        let subject = self.resolve_subject(user, application).await?;
        let mut role_names = subject.roles;
        role_names.extend(subject.app_roles.unwrap_or_default());

        let permissions = self
            .roles
            .permissions_for_roles(&role_names, app_id)
            .await?;

        // Cache failures are non-fatal
        let _ = self
            .redis
            .set(&cache_key, &permissions, Some(PERMISSION_CACHE_TTL))
            .await;

        Ok(permissions)
    }

    /// Single (resource, action) check used by gRPC `CheckPermission`.
    pub async fn check_permission(
        &self,
        user: &User,
        application: Option<&Application>,
        resource: &str,
        action: &str,
    ) -> Result<bool, ApiError> {
        let permissions = self.permissions(user, application).await?;
        Ok(permissions
            .iter()
            .any(|p| p.resource == resource && p.action == action))
    }

    /// Assigns a role and drops the affected cache entries.
    pub async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ApiError> {
        self.roles.assign_role(user_id, role_id).await?;
        self.invalidate_permission_cache(user_id, None).await;
        Ok(())
    }

    pub async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ApiError> {
        self.roles.revoke_role(user_id, role_id).await?;
        self.invalidate_permission_cache(user_id, None).await;
        Ok(())
    }

    /// Drops cached permissions for a user (all scopes when
    /// `application_id` is None - cheap, the cache is tiny and short).
    async fn invalidate_permission_cache(&self, user_id: Uuid, application_id: Option<Uuid>) {
        let key = permission_cache_key(user_id, application_id);
        let _ = self.redis.delete(&key).await;
        if application_id.is_some() {
            let _ = self.redis.delete(&permission_cache_key(user_id, None)).await;
        }
    }

    // =========================================================================
    // SYNC PULL
    // =========================================================================

    /// Pages users for the `SyncUsers(updated_after)` pull products use
    /// to cover missed webhooks.
    pub async fn sync_users(
        &self,
        updated_after: Option<chrono::DateTime<chrono::Utc>>,
        page_size: i64,
        page: i64,
    ) -> Result<(Vec<User>, i64), ApiError> {
        let page_size = page_size.clamp(1, 500);
        let offset = page.max(0) * page_size;
        self.users
            .list_updated_after(updated_after, page_size, offset)
            .await
    }
}

fn permission_cache_key(user_id: Uuid, application_id: Option<Uuid>) -> String {
    match application_id {
        Some(app) => format!("perm:{user_id}:{app}"),
        None => format!("perm:{user_id}:global"),
    }
}

impl std::fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityService").finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_cache_key_scoping() {
        let user = Uuid::new_v4();
        let app = Uuid::new_v4();

        assert_ne!(
            permission_cache_key(user, Some(app)),
            permission_cache_key(user, None)
        );
        assert!(permission_cache_key(user, None).ends_with(":global"));
    }
}
