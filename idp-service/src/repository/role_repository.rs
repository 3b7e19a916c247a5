//! # Role Repository
//!
//! Data access for roles, permissions and user-role assignments.
//!
//! Role name uniqueness is `(name, application_id_or_nil)`; a NULL
//! application id marks a global role. Permissions materialize on read
//! through `roles -> role_permissions -> permissions`; the identity
//! service caches the result with a short TTL.

use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Permission, Role};

/// Repository for role and permission operations.
#[derive(Debug, Clone)]
pub struct RoleRepository {
    pool: PgPool,
}

impl RoleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // ROLES
    // =========================================================================

    pub async fn create_role(
        &self,
        application_id: Option<Uuid>,
        name: &str,
        description: Option<&str>,
    ) -> Result<Role, ApiError> {
        sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (application_id, name, description)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(application_id)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_sqlx(e, "role name already exists in this scope"))
    }

    pub async fn find_role(
        &self,
        name: &str,
        application_id: Option<Uuid>,
    ) -> Result<Option<Role>, ApiError> {
        sqlx::query_as::<_, Role>(
            r#"
            SELECT * FROM roles
            WHERE name = $1 AND application_id IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(name)
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }

    /// Global role names held by a user.
    pub async fn global_role_names(&self, user_id: Uuid) -> Result<Vec<String>, ApiError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT r.name FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1 AND r.application_id IS NULL
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    /// Role names a user holds inside one application (via user_roles,
    /// not the profile's app_roles list - the identity service unions
    /// both).
    pub async fn app_role_names(
        &self,
        user_id: Uuid,
        application_id: Uuid,
    ) -> Result<Vec<String>, ApiError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT r.name FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1 AND r.application_id = $2
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    /// Assigns a role to a user; idempotent.
    pub async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    pub async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(r#"DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2"#)
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    // =========================================================================
    // PERMISSIONS
    // =========================================================================

    pub async fn create_permission(
        &self,
        name: &str,
        resource: &str,
        action: &str,
    ) -> Result<Permission, ApiError> {
        sqlx::query_as::<_, Permission>(
            r#"
            INSERT INTO permissions (name, resource, action)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(resource)
        .bind(action)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_sqlx(e, "permission already exists"))
    }

    /// Attaches a permission to a role; idempotent.
    pub async fn attach_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)?;

        Ok(())
    }

    /// Permissions granted by a set of role names within an application
    /// scope, materialized via Role × RolePermission × Permission.
    pub async fn permissions_for_roles(
        &self,
        role_names: &[String],
        application_id: Option<Uuid>,
    ) -> Result<Vec<Permission>, ApiError> {
        sqlx::query_as::<_, Permission>(
            r#"
            SELECT DISTINCT p.* FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            JOIN roles r ON r.id = rp.role_id
            WHERE r.name = ANY($1)
              AND (r.application_id IS NULL OR r.application_id IS NOT DISTINCT FROM $2)
            ORDER BY p.resource, p.action
            "#,
        )
        .bind(role_names)
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::DatabaseError)
    }
}
