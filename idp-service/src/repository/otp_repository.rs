//! # OTP Repository
//!
//! Data access for single-use codes.
//!
//! Invariants:
//! - at most one non-used OTP per (target, type): issuing supersedes the
//!   previous code
//! - consumption is single-shot: `SET used = TRUE WHERE used = FALSE`
//!   rejects the loser of a race

use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::Otp;

/// Repository for OTP operations.
#[derive(Debug, Clone)]
pub struct OtpRepository {
    pool: PgPool,
}

impl OtpRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stores a new OTP, superseding any outstanding code for the same
    /// (target, type).
    ///
    /// The supersede + insert runs in one transaction so the "at most
    /// one non-used OTP per (target, type)" invariant holds at every
    /// instant.
    pub async fn issue(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        code_hash: &str,
        otp_type: &str,
        ttl_seconds: u64,
    ) -> Result<Otp, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::DatabaseError)?;

        sqlx::query(
            r#"
            UPDATE otps SET used = TRUE
            WHERE used = FALSE
              AND otp_type = $3
              AND email IS NOT DISTINCT FROM $1
              AND phone IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(email)
        .bind(phone)
        .bind(otp_type)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        let otp = sqlx::query_as::<_, Otp>(
            r#"
            INSERT INTO otps (email, phone, code_hash, otp_type, expires_at)
            VALUES ($1, $2, $3, $4, NOW() + make_interval(secs => $5))
            RETURNING *
            "#,
        )
        .bind(email)
        .bind(phone)
        .bind(code_hash)
        .bind(otp_type)
        .bind(ttl_seconds as f64)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::DatabaseError)?;

        tx.commit().await.map_err(ApiError::DatabaseError)?;

        Ok(otp)
    }

    /// The latest OTP for a (target, type), used or not.
    ///
    /// Fetching the latest regardless of state lets the service
    /// distinguish `OtpConsumed` from `OtpExpired` from plain mismatch.
    pub async fn find_latest(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        otp_type: &str,
    ) -> Result<Option<Otp>, ApiError> {
        sqlx::query_as::<_, Otp>(
            r#"
            SELECT * FROM otps
            WHERE otp_type = $3
              AND email IS NOT DISTINCT FROM $1
              AND phone IS NOT DISTINCT FROM $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(phone)
        .bind(otp_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Consumes an OTP: single-shot conditional update. Returns `false`
    /// when another request already consumed it.
    pub async fn consume(&self, otp_id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"UPDATE otps SET used = TRUE WHERE id = $1 AND used = FALSE"#,
        )
        .bind(otp_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes expired rows; housekeeping worker.
    pub async fn delete_expired(&self) -> Result<u64, ApiError> {
        let result = sqlx::query(r#"DELETE FROM otps WHERE expires_at < NOW() - INTERVAL '1 day'"#)
            .execute(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected())
    }
}
