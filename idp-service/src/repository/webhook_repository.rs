//! # Webhook Repository
//!
//! Data access for webhook registrations and the delivery queue.
//!
//! ## Queue Semantics
//!
//! Deliveries live in a queue table. A worker claims due rows with a
//! conditional `pending -> delivering` update, performs the HTTP POST
//! *outside* any transaction, then records the outcome. At-least-once:
//! a worker crash after POST but before recording leaves the row
//! claimable again.

use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Webhook, WebhookDelivery, WebhookStats};

/// Repository for webhook operations.
#[derive(Debug, Clone)]
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // REGISTRATIONS
    // =========================================================================

    pub async fn create(
        &self,
        application_id: Uuid,
        url: &str,
        secret: &str,
        events: &[String],
    ) -> Result<Webhook, ApiError> {
        sqlx::query_as::<_, Webhook>(
            r#"
            INSERT INTO webhooks (application_id, url, secret, events)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(application_id)
        .bind(url)
        .bind(secret)
        .bind(events)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Webhook>, ApiError> {
        sqlx::query_as::<_, Webhook>(
            r#"SELECT * FROM webhooks WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Active webhooks for one application.
    pub async fn list_for_application(
        &self,
        application_id: Uuid,
    ) -> Result<Vec<Webhook>, ApiError> {
        sqlx::query_as::<_, Webhook>(
            r#"
            SELECT * FROM webhooks
            WHERE application_id = $1 AND is_active = TRUE AND deleted_at IS NULL
            "#,
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Active webhooks across all applications (for global user events).
    pub async fn list_active(&self) -> Result<Vec<Webhook>, ApiError> {
        sqlx::query_as::<_, Webhook>(
            r#"SELECT * FROM webhooks WHERE is_active = TRUE AND deleted_at IS NULL"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn soft_delete(&self, id: Uuid) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"UPDATE webhooks SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("webhook:{}", id),
            });
        }

        Ok(())
    }

    // =========================================================================
    // DELIVERY QUEUE
    // =========================================================================

    /// Enqueues a delivery, due immediately.
    pub async fn enqueue(
        &self,
        webhook_id: Uuid,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookDelivery, ApiError> {
        sqlx::query_as::<_, WebhookDelivery>(
            r#"
            INSERT INTO webhook_deliveries (
                webhook_id, event, payload, status, next_attempt_at
            )
            VALUES ($1, $2, $3, 'pending', NOW())
            RETURNING *
            "#,
        )
        .bind(webhook_id)
        .bind(event)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Claims up to `limit` due deliveries.
    ///
    /// `FOR UPDATE SKIP LOCKED` + the conditional status flip make the
    /// claim safe under multiple workers, and the claim transaction never
    /// spans network I/O.
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<WebhookDelivery>, ApiError> {
        sqlx::query_as::<_, WebhookDelivery>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'delivering', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status = 'pending' AND next_attempt_at <= NOW()
                ORDER BY next_attempt_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Records a successful delivery.
    pub async fn mark_succeeded(&self, id: Uuid, status_code: i32) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'succeeded',
                attempt_count = attempt_count + 1,
                last_status_code = $2,
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status_code)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Records a failed attempt and either schedules the retry or parks
    /// the delivery as `failed` once `max_attempts` is reached.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        status_code: Option<i32>,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET attempt_count = attempt_count + 1,
                last_status_code = $2,
                last_error = $3,
                next_attempt_at = $4,
                status = CASE
                    WHEN attempt_count + 1 >= $5 THEN 'failed'
                    ELSE 'pending'
                END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status_code)
        .bind(error)
        .bind(next_attempt_at)
        .bind(max_attempts)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Per-webhook delivery counters for the status view.
    pub async fn stats(&self, webhook_id: Uuid) -> Result<WebhookStats, ApiError> {
        sqlx::query_as::<_, WebhookStats>(
            r#"
            SELECT
                $1::uuid AS webhook_id,
                COUNT(*) FILTER (WHERE status IN ('pending', 'delivering')) AS pending,
                COUNT(*) FILTER (WHERE status = 'succeeded') AS succeeded,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM webhook_deliveries
            WHERE webhook_id = $1
            "#,
        )
        .bind(webhook_id)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }
}
