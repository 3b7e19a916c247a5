//! # Application Repository
//!
//! Data access for tenant applications, their API keys and IP filters.
//!
//! Invariants enforced here or at the service layer:
//! - system applications cannot be deleted
//! - secrets and API keys are stored hashed; plaintext exists only in
//!   the response that created them

use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{ApiKey, Application, IpFilter};

/// Repository for application, API-key and IP-filter operations.
#[derive(Debug, Clone)]
pub struct ApplicationRepository {
    pool: PgPool,
}

impl ApplicationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // APPLICATION OPERATIONS
    // =========================================================================

    /// Creates an application. The secret must be pre-hashed.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        name: &str,
        display_name: &str,
        allowed_auth_methods: &[String],
        allowed_grpc_scopes: &[String],
        callback_urls: &[String],
        homepage_url: Option<&str>,
        secret_hash: &str,
        secret_prefix: &str,
        owner_user_id: Option<Uuid>,
    ) -> Result<Application, ApiError> {
        sqlx::query_as::<_, Application>(
            r#"
            INSERT INTO applications (
                name, display_name, allowed_auth_methods, allowed_grpc_scopes,
                callback_urls, homepage_url, secret_hash, secret_prefix,
                owner_user_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(display_name)
        .bind(allowed_auth_methods)
        .bind(allowed_grpc_scopes)
        .bind(callback_urls)
        .bind(homepage_url)
        .bind(secret_hash)
        .bind(secret_prefix)
        .bind(owner_user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_sqlx(e, "application name already taken"))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Application>, ApiError> {
        sqlx::query_as::<_, Application>(
            r#"SELECT * FROM applications WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Application>, ApiError> {
        sqlx::query_as::<_, Application>(
            r#"SELECT * FROM applications WHERE name = $1 AND deleted_at IS NULL"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Resolves an application by its hashed secret (for `app_`
    /// credential verification).
    pub async fn find_by_secret_hash(
        &self,
        secret_hash: &str,
    ) -> Result<Option<Application>, ApiError> {
        sqlx::query_as::<_, Application>(
            r#"
            SELECT * FROM applications
            WHERE secret_hash = $1 AND is_active = TRUE AND deleted_at IS NULL
            "#,
        )
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn list(&self) -> Result<Vec<Application>, ApiError> {
        sqlx::query_as::<_, Application>(
            r#"SELECT * FROM applications WHERE deleted_at IS NULL ORDER BY created_at"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Updates mutable application policy fields.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        allowed_auth_methods: Option<&[String]>,
        allowed_grpc_scopes: Option<&[String]>,
        callback_urls: Option<&[String]>,
        homepage_url: Option<&str>,
        branding: Option<&serde_json::Value>,
        is_active: Option<bool>,
    ) -> Result<Application, ApiError> {
        sqlx::query_as::<_, Application>(
            r#"
            UPDATE applications
            SET display_name = COALESCE($2, display_name),
                allowed_auth_methods = COALESCE($3, allowed_auth_methods),
                allowed_grpc_scopes = COALESCE($4, allowed_grpc_scopes),
                callback_urls = COALESCE($5, callback_urls),
                homepage_url = COALESCE($6, homepage_url),
                branding = COALESCE($7, branding),
                is_active = COALESCE($8, is_active),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(allowed_auth_methods)
        .bind(allowed_grpc_scopes)
        .bind(callback_urls)
        .bind(homepage_url)
        .bind(branding)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?
        .ok_or_else(|| ApiError::NotFound {
            resource: format!("application:{}", id),
        })
    }

    /// Replaces the application secret (rotation). The old secret stops
    /// working immediately; it is never recoverable.
    pub async fn rotate_secret(
        &self,
        id: Uuid,
        secret_hash: &str,
        secret_prefix: &str,
    ) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET secret_hash = $2,
                secret_prefix = $3,
                secret_rotated_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(secret_hash)
        .bind(secret_prefix)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("application:{}", id),
            });
        }

        Ok(())
    }

    /// Soft deletes a non-system application.
    ///
    /// The `is_system = FALSE` predicate makes system-app protection a
    /// database-level guarantee, not just a service check.
    pub async fn soft_delete(&self, id: Uuid) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL AND is_system = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::AccessDenied);
        }

        Ok(())
    }

    // =========================================================================
    // API KEY OPERATIONS
    // =========================================================================

    /// Creates an API key record. The key must be pre-hashed.
    pub async fn create_api_key(
        &self,
        key_hash: &str,
        key_prefix: &str,
        name: &str,
        scopes: &[String],
        application_id: Option<Uuid>,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<ApiKey, ApiError> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (
                key_hash, key_prefix, name, scopes, application_id, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(key_hash)
        .bind(key_prefix)
        .bind(name)
        .bind(scopes)
        .bind(application_id)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Looks up an API key by hash. Activity/expiry checks happen in the
    /// policy gate so the audit log can tell "unknown key" from
    /// "expired key".
    pub async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, ApiError> {
        sqlx::query_as::<_, ApiKey>(r#"SELECT * FROM api_keys WHERE key_hash = $1"#)
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Stamps `last_used_at`; fire-and-forget from the gate.
    pub async fn touch_api_key(&self, id: Uuid) -> Result<(), ApiError> {
        sqlx::query(r#"UPDATE api_keys SET last_used_at = NOW() WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Deactivates an API key.
    pub async fn revoke_api_key(&self, id: Uuid) -> Result<(), ApiError> {
        let result = sqlx::query(r#"UPDATE api_keys SET is_active = FALSE WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("api_key:{}", id),
            });
        }

        Ok(())
    }

    pub async fn list_api_keys(
        &self,
        application_id: Option<Uuid>,
    ) -> Result<Vec<ApiKey>, ApiError> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT * FROM api_keys
            WHERE ($1::uuid IS NULL OR application_id = $1)
            ORDER BY created_at
            "#,
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    // =========================================================================
    // IP FILTER OPERATIONS
    // =========================================================================

    /// Active filters for an application, plus global ones.
    pub async fn list_ip_filters(
        &self,
        application_id: Option<Uuid>,
    ) -> Result<Vec<IpFilter>, ApiError> {
        sqlx::query_as::<_, IpFilter>(
            r#"
            SELECT * FROM ip_filters
            WHERE deleted_at IS NULL
              AND (application_id IS NULL OR application_id = $1)
            ORDER BY created_at
            "#,
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn add_ip_filter(
        &self,
        application_id: Option<Uuid>,
        cidr: &str,
        filter_type: &str,
        description: Option<&str>,
    ) -> Result<IpFilter, ApiError> {
        sqlx::query_as::<_, IpFilter>(
            r#"
            INSERT INTO ip_filters (application_id, cidr, filter_type, description)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(application_id)
        .bind(cidr)
        .bind(filter_type)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn remove_ip_filter(&self, id: Uuid) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"UPDATE ip_filters SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound {
                resource: format!("ip_filter:{}", id),
            });
        }

        Ok(())
    }
}
