//! # Session Repository
//!
//! Data access for the session (refresh-token) table.
//!
//! ## The Device-Reuse Invariant
//!
//! `(user, device_id, active)` has at most one row. A repeat login from
//! the same device **mutates** that row - rotating both token hashes and
//! refreshing timestamps - instead of inserting. The update runs as a
//! single conditional statement, so concurrent logins from one device
//! serialize on the row lock and the last writer wins without ever
//! producing a second active row.
//!
//! ## Revocation
//!
//! `revoked_at` is monotonic: the revoke queries all carry
//! `AND revoked_at IS NULL`, so a revocation is set exactly once and
//! never cleared. The session row also carries the paired
//! `access_token_hash`, which is what makes access-token revocation
//! immediate - the verify path checks the hash against the live row.

use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::Session;

/// Everything a session row records about the client that opened it.
#[derive(Debug, Clone, Default)]
pub struct SessionClient {
    pub device_fingerprint: Option<String>,
    pub device_type: Option<String>,
    pub device_os: Option<String>,
    pub device_browser: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_name: Option<String>,
}

/// Repository for session operations.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Rotates the unique active `(user, device_id)` row, if any.
    ///
    /// Returns `None` when there is no active row for the pair, in which
    /// case the caller inserts. The row keeps its `id` and `device_id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn rotate_device_session(
        &self,
        user_id: Uuid,
        application_id: Option<Uuid>,
        device_id: &str,
        token_hash: &str,
        access_token_hash: &str,
        expires_at: DateTime<Utc>,
        client: &SessionClient,
    ) -> Result<Option<Session>, ApiError> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET token_hash = $4,
                access_token_hash = $5,
                application_id = $3,
                device_fingerprint = $7,
                device_type = $8,
                device_os = $9,
                device_browser = $10,
                ip_address = $11,
                user_agent = $12,
                last_active_at = NOW(),
                expires_at = $6
            WHERE user_id = $1
              AND device_id = $2
              AND revoked_at IS NULL
              AND expires_at > NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(application_id)
        .bind(token_hash)
        .bind(access_token_hash)
        .bind(expires_at)
        .bind(&client.device_fingerprint)
        .bind(&client.device_type)
        .bind(&client.device_os)
        .bind(&client.device_browser)
        .bind(&client.ip_address)
        .bind(&client.user_agent)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Inserts a fresh session row.
    ///
    /// `device_id = None` is the no-reuse path for callers that don't
    /// propagate a device id.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        user_id: Uuid,
        application_id: Option<Uuid>,
        device_id: Option<&str>,
        token_hash: &str,
        access_token_hash: &str,
        expires_at: DateTime<Utc>,
        client: &SessionClient,
    ) -> Result<Session, ApiError> {
        sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (
                user_id, application_id, device_id, token_hash,
                access_token_hash, device_fingerprint, device_type,
                device_os, device_browser, ip_address, user_agent,
                session_name, last_active_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), $13)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .bind(device_id)
        .bind(token_hash)
        .bind(access_token_hash)
        .bind(&client.device_fingerprint)
        .bind(&client.device_type)
        .bind(&client.device_os)
        .bind(&client.device_browser)
        .bind(&client.ip_address)
        .bind(&client.user_agent)
        .bind(&client.session_name)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Rotates token hashes on a known session row (refresh grant).
    /// Keeps id and device binding; refreshes activity and TTL.
    pub async fn rotate_session_tokens(
        &self,
        session_id: Uuid,
        token_hash: &str,
        access_token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Session>, ApiError> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET token_hash = $2,
                access_token_hash = $3,
                last_active_at = NOW(),
                expires_at = $4
            WHERE id = $1
              AND revoked_at IS NULL
              AND expires_at > NOW()
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(token_hash)
        .bind(access_token_hash)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Finds the active session for a refresh-token hash.
    pub async fn find_active_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, ApiError> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE token_hash = $1
              AND revoked_at IS NULL
              AND expires_at > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Whether an access-token hash belongs to a live session.
    ///
    /// `false` means the session was revoked or the token was rotated
    /// away; the verify path surfaces that as `TokenRevoked`.
    pub async fn access_token_live(&self, access_token_hash: &str) -> Result<bool, ApiError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM sessions
            WHERE access_token_hash = $1
              AND revoked_at IS NULL
              AND expires_at > NOW()
            "#,
        )
        .bind(access_token_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(count.0 > 0)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, ApiError> {
        sqlx::query_as::<_, Session>(r#"SELECT * FROM sessions WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// All active sessions for a user.
    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>, ApiError> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE user_id = $1
              AND revoked_at IS NULL
              AND expires_at > NOW()
            ORDER BY last_active_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Revokes one session. Monotonic: a second call affects 0 rows.
    pub async fn revoke(&self, session_id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"UPDATE sessions SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL"#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically revokes every active session for a (user, device) pair.
    pub async fn revoke_by_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET revoked_at = NOW()
            WHERE user_id = $1 AND device_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected())
    }

    /// Revokes all sessions for a user ("logout everywhere", password
    /// reset).
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"UPDATE sessions SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected())
    }

    /// Deletes long-expired rows; called by the housekeeping worker.
    pub async fn delete_expired(&self) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"DELETE FROM sessions WHERE expires_at < NOW() - INTERVAL '30 days'"#,
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected())
    }
}
