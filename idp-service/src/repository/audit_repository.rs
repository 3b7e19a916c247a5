//! # Audit Repository
//!
//! Append-only audit trail: every authentication attempt, role change,
//! token revocation and admin action, with caller, IP, UA, target,
//! outcome and error category.
//!
//! Writes are fire-and-forget from the caller's perspective - an audit
//! failure is logged but never fails the user-facing operation.

use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::AuditLogEntry;

/// What gets recorded for one audit event.
#[derive(Debug, Clone, Default)]
pub struct AuditRecord {
    pub user_id: Option<Uuid>,
    pub application_id: Option<Uuid>,
    pub action: String,
    pub outcome: String,
    pub error_category: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub target: Option<String>,
}

impl AuditRecord {
    /// A success record for an action.
    pub fn success(action: &str) -> Self {
        Self {
            action: action.to_string(),
            outcome: "success".to_string(),
            ..Default::default()
        }
    }

    /// A failure record carrying the stable error code as category.
    pub fn failure(action: &str, error_category: &str) -> Self {
        Self {
            action: action.to_string(),
            outcome: "failure".to_string(),
            error_category: Some(error_category.to_string()),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn application(mut self, application_id: Option<Uuid>) -> Self {
        self.application_id = application_id;
        self
    }

    pub fn client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip;
        self.user_agent = user_agent;
        self
    }

    pub fn target(mut self, target: String) -> Self {
        self.target = Some(target);
        self
    }
}

/// Repository for audit log writes and reads.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends an audit record. Errors are swallowed after logging so an
    /// audit hiccup never breaks authentication.
    pub async fn record(&self, record: AuditRecord) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (
                user_id, application_id, action, outcome,
                error_category, ip_address, user_agent, target
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.user_id)
        .bind(record.application_id)
        .bind(&record.action)
        .bind(&record.outcome)
        .bind(&record.error_category)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(&record.target)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, action = %record.action, "Failed to write audit record");
        }
    }

    /// Recent entries for a user, newest first.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>, ApiError> {
        sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT * FROM audit_log
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
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

    #[test]
    fn test_record_builders() {
        let user = Uuid::new_v4();
        let record = AuditRecord::failure("auth.password_signin", "ACCOUNT_LOCKED")
            .user(user)
            .client(Some("10.0.0.1".into()), Some("curl/8".into()))
            .target(format!("user:{user}"));

        assert_eq!(record.outcome, "failure");
        assert_eq!(record.error_category.as_deref(), Some("ACCOUNT_LOCKED"));
        assert_eq!(record.user_id, Some(user));
        assert!(record.target.unwrap().starts_with("user:"));
    }
}
