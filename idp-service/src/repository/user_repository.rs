//! # User Repository
//!
//! Data access for the unified `users` table, password history, and the
//! per-application profile edge.
//!
//! ## Query Patterns
//!
//! | Pattern | Example |
//! |---------|---------|
//! | Soft delete | `WHERE deleted_at IS NULL` |
//! | Idempotent profile | `INSERT ... ON CONFLICT ... DO UPDATE SET last_access_at` |
//! | Returning | `INSERT ... RETURNING *` |
//! | Parameterized | always `$1, $2`, never interpolation |
//!
//! Unique-constraint violations (email/phone/username) surface as
//! `ApiError::Conflict` via [`ApiError::from_sqlx`].

use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{NewUser, User, UserApplicationProfile};

/// Repository for user and profile operations.
///
/// `Send + Sync` because `PgPool` is Arc-based; cloning is cheap.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // USER OPERATIONS
    // =========================================================================

    /// Creates a new user.
    ///
    /// ## Errors
    ///
    /// - `ApiError::Conflict` if email, phone or username already exists
    pub async fn create(&self, new_user: NewUser) -> Result<User, ApiError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                email, phone, username, password_hash,
                email_verified, phone_verified
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&new_user.email)
        .bind(&new_user.phone)
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .bind(new_user.email_verified)
        .bind(new_user.phone_verified)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_sqlx(e, "user identity already registered"))
    }

    /// Finds an active user by id.
    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, ApiError> {
        sqlx::query_as::<_, User>(
            r#"SELECT * FROM users WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Finds an active user by normalized email.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        sqlx::query_as::<_, User>(
            r#"SELECT * FROM users WHERE email = $1 AND deleted_at IS NULL"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Finds an active user by E.164 phone.
    pub async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, ApiError> {
        sqlx::query_as::<_, User>(
            r#"SELECT * FROM users WHERE phone = $1 AND deleted_at IS NULL"#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Finds an active user by username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        sqlx::query_as::<_, User>(
            r#"SELECT * FROM users WHERE username = $1 AND deleted_at IS NULL"#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Checks whether a username is taken (for auto-username generation).
    pub async fn username_exists(&self, username: &str) -> Result<bool, ApiError> {
        let count: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM users WHERE username = $1 AND deleted_at IS NULL"#,
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(count.0 > 0)
    }

    /// Updates the last login timestamp.
    pub async fn update_last_login(&self, user_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"UPDATE users SET last_login_at = NOW() WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Replaces the password hash, recording the previous one in the
    /// history table and stamping `password_changed_at`.
    ///
    /// `expires_at` applies the tenant rotation policy; `None` disables
    /// expiry.
    pub async fn update_password(
        &self,
        user_id: Uuid,
        new_hash: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;

        // Keep the old hash for the reuse check
        sqlx::query(
            r#"
            INSERT INTO password_history (user_id, password_hash)
            SELECT id, password_hash FROM users
            WHERE id = $1 AND password_hash IS NOT NULL
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1,
                password_changed_at = NOW(),
                password_expires_at = $2,
                updated_at = NOW()
            WHERE id = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(new_hash)
        .bind(expires_at)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("user:{}", user_id),
            });
        }

        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Silently upgrades a password hash (lazy rehash on login).
    ///
    /// No history entry: the password itself did not change.
    pub async fn rehash_password(&self, user_id: Uuid, new_hash: &str) -> Result<(), ApiError> {
        sqlx::query(
            r#"UPDATE users SET password_hash = $1 WHERE id = $2 AND deleted_at IS NULL"#,
        )
        .bind(new_hash)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Last `depth` password hashes, newest first.
    pub async fn password_history(
        &self,
        user_id: Uuid,
        depth: u32,
    ) -> Result<Vec<String>, ApiError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT password_hash FROM password_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(depth as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(rows.into_iter().map(|(h,)| h).collect())
    }

    /// Sets or clears the TOTP secret.
    pub async fn set_totp_secret(
        &self,
        user_id: Uuid,
        secret: Option<&str>,
    ) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"UPDATE users SET totp_secret = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL"#,
        )
        .bind(secret)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("user:{}", user_id),
            });
        }

        Ok(())
    }

    /// Flips the global active flag.
    pub async fn set_active(&self, user_id: Uuid, is_active: bool) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"UPDATE users SET is_active = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL"#,
        )
        .bind(is_active)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("user:{}", user_id),
            });
        }

        Ok(())
    }

    /// Marks the email as verified.
    pub async fn set_email_verified(&self, user_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Marks the phone as verified.
    pub async fn set_phone_verified(&self, user_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"UPDATE users SET phone_verified = TRUE, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Soft deletes a user. The record remains for audit purposes but is
    /// excluded from every query.
    pub async fn soft_delete(&self, user_id: Uuid) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"UPDATE users SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("user:{}", user_id),
            });
        }

        Ok(())
    }

    /// Pages users updated after a watermark, for the sync pull.
    pub async fn list_updated_after(
        &self,
        updated_after: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<User>, i64), ApiError> {
        let watermark = updated_after.unwrap_or(DateTime::<Utc>::MIN_UTC);

        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE updated_at > $1 AND deleted_at IS NULL
            ORDER BY updated_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(watermark)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        let total: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM users WHERE updated_at > $1 AND deleted_at IS NULL"#,
        )
        .bind(watermark)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok((users, total.0))
    }

    // =========================================================================
    // PROFILE OPERATIONS
    // =========================================================================

    /// Finds a user's profile in an application.
    pub async fn find_profile(
        &self,
        user_id: Uuid,
        application_id: Uuid,
    ) -> Result<Option<UserApplicationProfile>, ApiError> {
        sqlx::query_as::<_, UserApplicationProfile>(
            r#"
            SELECT * FROM user_application_profiles
            WHERE user_id = $1 AND application_id = $2
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Idempotent, atomic find-or-create of the (user, application)
    /// profile edge.
    ///
    /// Missing: inserts with the given default roles. Present: touches
    /// `last_access_at`. Concurrent first logins resolve via the unique
    /// constraint - one inserts, the other updates.
    pub async fn touch_or_create_profile(
        &self,
        user_id: Uuid,
        application_id: Uuid,
        default_roles: &[String],
    ) -> Result<UserApplicationProfile, ApiError> {
        sqlx::query_as::<_, UserApplicationProfile>(
            r#"
            INSERT INTO user_application_profiles (
                user_id, application_id, metadata, app_roles, last_access_at
            )
            VALUES ($1, $2, '{}'::jsonb, $3, NOW())
            ON CONFLICT (user_id, application_id)
            DO UPDATE SET last_access_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .bind(default_roles)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Updates mutable profile fields.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        application_id: Uuid,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
        nickname: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<UserApplicationProfile, ApiError> {
        sqlx::query_as::<_, UserApplicationProfile>(
            r#"
            UPDATE user_application_profiles
            SET display_name = COALESCE($3, display_name),
                avatar_url = COALESCE($4, avatar_url),
                nickname = COALESCE($5, nickname),
                metadata = COALESCE($6, metadata),
                updated_at = NOW()
            WHERE user_id = $1 AND application_id = $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .bind(display_name)
        .bind(avatar_url)
        .bind(nickname)
        .bind(metadata)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?
        .ok_or_else(|| ApiError::NotFound {
            resource: format!("profile:{}:{}", user_id, application_id),
        })
    }

    /// Replaces the app-role list on a profile.
    pub async fn set_profile_roles(
        &self,
        user_id: Uuid,
        application_id: Uuid,
        app_roles: &[String],
    ) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE user_application_profiles
            SET app_roles = $3, updated_at = NOW()
            WHERE user_id = $1 AND application_id = $2
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .bind(app_roles)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("profile:{}:{}", user_id, application_id),
            });
        }

        Ok(())
    }

    /// Bans a profile. Auth into this application short-circuits with
    /// `Banned` from now on.
    pub async fn ban_profile(
        &self,
        user_id: Uuid,
        application_id: Uuid,
        reason: Option<&str>,
        banned_by: Option<Uuid>,
    ) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE user_application_profiles
            SET is_banned = TRUE,
                ban_reason = $3,
                banned_at = NOW(),
                banned_by = $4,
                updated_at = NOW()
            WHERE user_id = $1 AND application_id = $2
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .bind(reason)
        .bind(banned_by)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("profile:{}:{}", user_id, application_id),
            });
        }

        Ok(())
    }

    /// Lifts a ban.
    pub async fn unban_profile(
        &self,
        user_id: Uuid,
        application_id: Uuid,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE user_application_profiles
            SET is_banned = FALSE,
                ban_reason = NULL,
                banned_at = NULL,
                banned_by = NULL,
                updated_at = NOW()
            WHERE user_id = $1 AND application_id = $2
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// All profiles for a user (cross-application view).
    pub async fn list_profiles(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<UserApplicationProfile>, ApiError> {
        sqlx::query_as::<_, UserApplicationProfile>(
            r#"SELECT * FROM user_application_profiles WHERE user_id = $1 ORDER BY created_at"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Query-level tests need a live database; the value-type plumbing is
    // covered here.

    #[test]
    fn test_new_user_struct() {
        let new_user = NewUser {
            email: Some("test@example.com".to_string()),
            phone: None,
            username: "test".to_string(),
            password_hash: Some("$argon2id$...".to_string()),
            email_verified: false,
            phone_verified: false,
        };

        assert_eq!(new_user.email.as_deref(), Some("test@example.com"));
        assert!(new_user.phone.is_none());
    }
}
