//! # SSO Repository
//!
//! Data access for cross-application exchange codes and SAML service
//! providers.
//!
//! Exchange-code redemption mirrors the OTP/authorization-code pattern:
//! a single-shot conditional update rejects the loser of a race, and a
//! consumed redemption is irreversible.

use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{SamlServiceProvider, TokenExchangeCode};

/// Repository for SSO artefacts.
#[derive(Debug, Clone)]
pub struct SsoRepository {
    pool: PgPool,
}

impl SsoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // TOKEN EXCHANGE CODES
    // =========================================================================

    /// Stores a one-shot exchange code. TTL is capped at 30 seconds by
    /// the exchange service.
    pub async fn create_exchange_code(
        &self,
        code_hash: &str,
        user_id: Uuid,
        source_application_id: Option<Uuid>,
        target_application_id: Uuid,
        scope_snapshot: &[String],
        ttl_seconds: u64,
    ) -> Result<TokenExchangeCode, ApiError> {
        sqlx::query_as::<_, TokenExchangeCode>(
            r#"
            INSERT INTO token_exchange_codes (
                code_hash, user_id, source_application_id,
                target_application_id, scope_snapshot, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW() + make_interval(secs => $6))
            RETURNING *
            "#,
        )
        .bind(code_hash)
        .bind(user_id)
        .bind(source_application_id)
        .bind(target_application_id)
        .bind(scope_snapshot)
        .bind(ttl_seconds as f64)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Looks up a code regardless of state so the service can report
    /// replay (`Conflict`) distinctly from unknown (`InvalidCredentials`).
    pub async fn find_exchange_code(
        &self,
        code_hash: &str,
    ) -> Result<Option<TokenExchangeCode>, ApiError> {
        sqlx::query_as::<_, TokenExchangeCode>(
            r#"SELECT * FROM token_exchange_codes WHERE code_hash = $1"#,
        )
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Single-shot consumption; `false` = already redeemed.
    pub async fn consume_exchange_code(&self, id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"UPDATE token_exchange_codes SET used = TRUE WHERE id = $1 AND used = FALSE"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // SAML SERVICE PROVIDERS
    // =========================================================================

    pub async fn find_sp_by_entity_id(
        &self,
        entity_id: &str,
    ) -> Result<Option<SamlServiceProvider>, ApiError> {
        sqlx::query_as::<_, SamlServiceProvider>(
            r#"SELECT * FROM saml_service_providers WHERE entity_id = $1"#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn create_sp(
        &self,
        application_id: Option<Uuid>,
        entity_id: &str,
        acs_url: &str,
        slo_url: Option<&str>,
        public_key_pem: Option<&str>,
        attribute_mappings: &serde_json::Value,
    ) -> Result<SamlServiceProvider, ApiError> {
        sqlx::query_as::<_, SamlServiceProvider>(
            r#"
            INSERT INTO saml_service_providers (
                application_id, entity_id, acs_url, slo_url,
                public_key_pem, attribute_mappings
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(application_id)
        .bind(entity_id)
        .bind(acs_url)
        .bind(slo_url)
        .bind(public_key_pem)
        .bind(attribute_mappings)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_sqlx(e, "entity_id already registered"))
    }

    pub async fn list_sps(&self) -> Result<Vec<SamlServiceProvider>, ApiError> {
        sqlx::query_as::<_, SamlServiceProvider>(
            r#"SELECT * FROM saml_service_providers ORDER BY created_at"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }
}
