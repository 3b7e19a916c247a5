//! # OAuth Repository
//!
//! Data access for the IdP-as-provider artefacts: clients, authorization
//! codes, access/refresh tokens, consents and device-grant records.
//!
//! ## Replay Defence
//!
//! Authorization-code redemption is a single-shot conditional update
//! (`SET used = TRUE WHERE used = FALSE`). Tokens remember their
//! originating code (`authorization_code_id`), so when a code is
//! replayed the tokens minted by the first redemption can be revoked in
//! one statement.

use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{AuthorizationCode, DeviceCodeGrant, OAuthClient, OAuthToken, UserConsent};

/// Repository for OAuth provider operations.
#[derive(Debug, Clone)]
pub struct OAuthRepository {
    pool: PgPool,
}

impl OAuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // CLIENTS
    // =========================================================================

    pub async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClient>, ApiError> {
        sqlx::query_as::<_, OAuthClient>(
            r#"SELECT * FROM oauth_clients WHERE client_id = $1 AND is_active = TRUE"#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_client(
        &self,
        client_id: &str,
        client_secret_hash: Option<&str>,
        name: &str,
        client_type: &str,
        redirect_uris: &[String],
        allowed_grant_types: &[String],
        allowed_scopes: &[String],
        require_pkce: bool,
        first_party: bool,
    ) -> Result<OAuthClient, ApiError> {
        sqlx::query_as::<_, OAuthClient>(
            r#"
            INSERT INTO oauth_clients (
                client_id, client_secret_hash, name, client_type,
                redirect_uris, allowed_grant_types, allowed_scopes,
                require_pkce, first_party
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(client_id)
        .bind(client_secret_hash)
        .bind(name)
        .bind(client_type)
        .bind(redirect_uris)
        .bind(allowed_grant_types)
        .bind(allowed_scopes)
        .bind(require_pkce)
        .bind(first_party)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_sqlx(e, "client_id already registered"))
    }

    // =========================================================================
    // AUTHORIZATION CODES
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    pub async fn create_authorization_code(
        &self,
        code_hash: &str,
        client_id: &str,
        user_id: Uuid,
        redirect_uri: &str,
        scope: &str,
        code_challenge: Option<&str>,
        code_challenge_method: Option<&str>,
        nonce: Option<&str>,
        ttl_seconds: u64,
    ) -> Result<AuthorizationCode, ApiError> {
        sqlx::query_as::<_, AuthorizationCode>(
            r#"
            INSERT INTO oauth_authorization_codes (
                code_hash, client_id, user_id, redirect_uri, scope,
                code_challenge, code_challenge_method, nonce, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW() + make_interval(secs => $9))
            RETURNING *
            "#,
        )
        .bind(code_hash)
        .bind(client_id)
        .bind(user_id)
        .bind(redirect_uri)
        .bind(scope)
        .bind(code_challenge)
        .bind(code_challenge_method)
        .bind(nonce)
        .bind(ttl_seconds as f64)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Looks up a code by hash regardless of `used`, so the token
    /// endpoint can distinguish replay from unknown.
    pub async fn find_authorization_code(
        &self,
        code_hash: &str,
    ) -> Result<Option<AuthorizationCode>, ApiError> {
        sqlx::query_as::<_, AuthorizationCode>(
            r#"SELECT * FROM oauth_authorization_codes WHERE code_hash = $1"#,
        )
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Single-shot redemption. `false` = the code was already used
    /// (replay) and the caller must trigger token revocation.
    pub async fn consume_authorization_code(&self, id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"UPDATE oauth_authorization_codes SET used = TRUE WHERE id = $1 AND used = FALSE"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // TOKENS
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    pub async fn create_token(
        &self,
        token_hash: &str,
        token_kind: &str,
        client_id: &str,
        user_id: Uuid,
        scope: &str,
        authorization_code_id: Option<Uuid>,
        expires_at: DateTime<Utc>,
    ) -> Result<OAuthToken, ApiError> {
        sqlx::query_as::<_, OAuthToken>(
            r#"
            INSERT INTO oauth_tokens (
                token_hash, token_kind, client_id, user_id, scope,
                authorization_code_id, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(token_hash)
        .bind(token_kind)
        .bind(client_id)
        .bind(user_id)
        .bind(scope)
        .bind(authorization_code_id)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn find_token(&self, token_hash: &str) -> Result<Option<OAuthToken>, ApiError> {
        sqlx::query_as::<_, OAuthToken>(r#"SELECT * FROM oauth_tokens WHERE token_hash = $1"#)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)
    }

    /// Revokes one token by hash.
    pub async fn revoke_token(&self, token_hash: &str) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"UPDATE oauth_tokens SET revoked_at = NOW() WHERE token_hash = $1 AND revoked_at IS NULL"#,
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Token-theft defence: revokes every token minted from one
    /// authorization code.
    pub async fn revoke_tokens_for_code(&self, code_id: Uuid) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_tokens SET revoked_at = NOW()
            WHERE authorization_code_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(code_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // CONSENTS
    // =========================================================================

    pub async fn find_consent(
        &self,
        user_id: Uuid,
        client_id: &str,
    ) -> Result<Option<UserConsent>, ApiError> {
        sqlx::query_as::<_, UserConsent>(
            r#"SELECT * FROM oauth_user_consents WHERE user_id = $1 AND client_id = $2"#,
        )
        .bind(user_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Records (or widens) a consent grant.
    pub async fn upsert_consent(
        &self,
        user_id: Uuid,
        client_id: &str,
        scopes: &[String],
    ) -> Result<UserConsent, ApiError> {
        sqlx::query_as::<_, UserConsent>(
            r#"
            INSERT INTO oauth_user_consents (user_id, client_id, scopes)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, client_id)
            DO UPDATE SET scopes = EXCLUDED.scopes, granted_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .bind(scopes)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    // =========================================================================
    // DEVICE AUTHORIZATION GRANT
    // =========================================================================

    pub async fn create_device_grant(
        &self,
        device_code_hash: &str,
        user_code: &str,
        client_id: &str,
        scope: &str,
        interval_seconds: i32,
        ttl_seconds: u64,
    ) -> Result<DeviceCodeGrant, ApiError> {
        sqlx::query_as::<_, DeviceCodeGrant>(
            r#"
            INSERT INTO oauth_device_codes (
                device_code_hash, user_code, client_id, scope,
                status, interval_seconds, expires_at
            )
            VALUES ($1, $2, $3, $4, 'pending', $5, NOW() + make_interval(secs => $6))
            RETURNING *
            "#,
        )
        .bind(device_code_hash)
        .bind(user_code)
        .bind(client_id)
        .bind(scope)
        .bind(interval_seconds)
        .bind(ttl_seconds as f64)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn find_device_grant_by_code_hash(
        &self,
        device_code_hash: &str,
    ) -> Result<Option<DeviceCodeGrant>, ApiError> {
        sqlx::query_as::<_, DeviceCodeGrant>(
            r#"SELECT * FROM oauth_device_codes WHERE device_code_hash = $1"#,
        )
        .bind(device_code_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    pub async fn find_device_grant_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<DeviceCodeGrant>, ApiError> {
        sqlx::query_as::<_, DeviceCodeGrant>(
            r#"SELECT * FROM oauth_device_codes WHERE user_code = $1"#,
        )
        .bind(user_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Moves a pending grant to a terminal state. Terminal states are
    /// sticky: only `pending` rows transition.
    pub async fn resolve_device_grant(
        &self,
        id: Uuid,
        status: &str,
        user_id: Option<Uuid>,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_device_codes
            SET status = $2, user_id = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }
}
