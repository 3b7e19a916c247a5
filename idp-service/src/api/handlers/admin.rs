//! # Admin & Public-Config Handlers
//!
//! Tenant management surfaces: applications, API keys, webhooks, IP
//! filters, plus the public per-application auth-config endpoint that
//! product frontends read at boot.
//!
//! Authorization: a user with the global `admin` role, or an
//! application secret acting on the application's own resources.

use actix_web::{web, HttpRequest, HttpResponse};
use shared::auth::api_key::{self, ApiScope, API_KEY_PREFIX, APP_SECRET_PREFIX};
use shared::auth::jwt::TokenService;
use shared::errors::ApiError;
use shared::validation;
use uuid::Uuid;

use crate::api::dto::{
    ApiKeyCreatedResponse, ApplicationCreatedResponse, CreateApiKeyRequest,
    CreateApplicationRequest, CreateWebhookRequest, MessageResponse, WebhookCreatedResponse,
};
use crate::api::handlers::auth::authenticate;
use crate::domain::{AuthConfigView, AuthMethod};
use crate::policy::{Caller, RequestContext};
use crate::repository::AuditRecord;
use crate::AppState;

/// Admin check: global `admin` role, or the application itself for its
/// own scoped resources.
fn require_admin(ctx: &RequestContext, resource_application: Option<Uuid>) -> Result<(), ApiError> {
    match &ctx.caller {
        Caller::User(claims) if claims.roles.iter().any(|r| r == "admin") => Ok(()),
        Caller::Application(app) => match resource_application {
            Some(target) if target == app.id => Ok(()),
            _ => Err(ApiError::AccessDenied),
        },
        _ => Err(ApiError::InsufficientScope {
            required: "admin".to_string(),
        }),
    }
}

// =============================================================================
// PUBLIC AUTH CONFIG
// =============================================================================

/// `GET /api/applications/{id}/auth-config` - public: what auth methods
/// and branding a product frontend should render.
pub async fn auth_config(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();

    let application = state
        .applications
        .find_by_id(id)
        .await?
        .filter(|app| app.is_active)
        .ok_or_else(|| ApiError::NotFound {
            resource: format!("application:{id}"),
        })?;

    Ok(HttpResponse::Ok().json(AuthConfigView::from(application)))
}

// =============================================================================
// APPLICATIONS
// =============================================================================

/// `POST /api/admin/applications`
pub async fn create_application(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateApplicationRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    // Methods and scopes come from closed sets
    for method in &body.allowed_auth_methods {
        if AuthMethod::parse(method).is_none() {
            return Err(ApiError::BadRequest {
                message: format!("unknown auth method: {method}"),
            });
        }
    }
    for scope in &body.allowed_grpc_scopes {
        if ApiScope::parse(scope).is_none() {
            return Err(ApiError::BadRequest {
                message: format!("unknown scope: {scope}"),
            });
        }
    }

    let secret = api_key::generate(APP_SECRET_PREFIX);

    let application = state
        .applications
        .create(
            &body.name,
            &body.display_name,
            &body.allowed_auth_methods,
            &body.allowed_grpc_scopes,
            &body.callback_urls,
            body.homepage_url.as_deref(),
            &secret.hash,
            &secret.display_prefix,
            ctx.caller.user_id(),
        )
        .await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.application_created")
                .application(Some(application.id))
                .target(format!("application:{}", application.id)),
        )
        .await;

    Ok(HttpResponse::Created().json(ApplicationCreatedResponse {
        application,
        secret: secret.plain,
    }))
}

/// `GET /api/admin/applications`
pub async fn list_applications(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    let applications = state.applications.list().await?;

    Ok(HttpResponse::Ok().json(applications))
}

/// `POST /api/admin/applications/{id}/rotate-secret`
///
/// The old secret stops working immediately and is never recoverable.
pub async fn rotate_application_secret(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, Some(id))?;

    let secret = api_key::generate(APP_SECRET_PREFIX);
    state
        .applications
        .rotate_secret(id, &secret.hash, &secret.display_prefix)
        .await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.secret_rotated")
                .application(Some(id))
                .target(format!("application:{id}")),
        )
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "secret": secret.plain })))
}

/// `DELETE /api/admin/applications/{id}` - refuses system applications.
pub async fn delete_application(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    state.applications.soft_delete(id).await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.application_deleted")
                .target(format!("application:{id}")),
        )
        .await;

    Ok(HttpResponse::NoContent().finish())
}

// =============================================================================
// API KEYS
// =============================================================================

/// `POST /api/admin/api-keys`
pub async fn create_api_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateApiKeyRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, body.application_id)?;

    for scope in &body.scopes {
        if ApiScope::parse(scope).is_none() {
            return Err(ApiError::BadRequest {
                message: format!("unknown scope: {scope}"),
            });
        }
    }

    // A bound key may only carry scopes its application allows
    if let Some(app_id) = body.application_id {
        let application = state
            .applications
            .find_by_id(app_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("application:{app_id}"),
            })?;

        for scope in &body.scopes {
            if !application.allows_scope(scope) {
                return Err(ApiError::InsufficientScope {
                    required: scope.clone(),
                });
            }
        }
    }

    let generated = api_key::generate(API_KEY_PREFIX);

    let record = state
        .applications
        .create_api_key(
            &generated.hash,
            &generated.display_prefix,
            &body.name,
            &body.scopes,
            body.application_id,
            body.expires_at,
        )
        .await?;

    Ok(HttpResponse::Created().json(ApiKeyCreatedResponse {
        api_key: record,
        key: generated.plain,
    }))
}

/// `GET /api/admin/api-keys` - optionally filtered by application.
pub async fn list_api_keys(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<std::collections::HashMap<String, Uuid>>,
) -> Result<HttpResponse, ApiError> {
    let application_id = query.get("application_id").copied();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, application_id)?;

    let keys = state.applications.list_api_keys(application_id).await?;

    Ok(HttpResponse::Ok().json(keys))
}

/// `DELETE /api/admin/api-keys/{id}`
pub async fn revoke_api_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    state.applications.revoke_api_key(path.into_inner()).await?;

    Ok(HttpResponse::NoContent().finish())
}

// =============================================================================
// WEBHOOKS
// =============================================================================

/// `POST /api/admin/webhooks`
pub async fn create_webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateWebhookRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, Some(body.application_id))?;

    // The signing secret is minted here and shown exactly once
    let secret = format!("whsec_{}", TokenService::new_opaque_token());

    let webhook = state
        .webhooks_repo
        .create(body.application_id, &body.url, &secret, &body.events)
        .await?;

    Ok(HttpResponse::Created().json(WebhookCreatedResponse {
        webhook_id: webhook.id,
        secret,
    }))
}

/// `GET /api/admin/webhooks/{id}/stats` - delivery counters.
pub async fn webhook_stats(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();

    let webhook = state
        .webhooks_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: format!("webhook:{id}"),
        })?;

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, Some(webhook.application_id))?;

    let stats = state.webhooks_repo.stats(id).await?;

    Ok(HttpResponse::Ok().json(stats))
}

/// `DELETE /api/admin/webhooks/{id}`
pub async fn delete_webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();

    let webhook = state
        .webhooks_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: format!("webhook:{id}"),
        })?;

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, Some(webhook.application_id))?;

    state.webhooks_repo.soft_delete(id).await?;

    Ok(HttpResponse::NoContent().finish())
}

// =============================================================================
// IP FILTERS
// =============================================================================

#[derive(Debug, serde::Deserialize)]
pub struct CreateIpFilterRequest {
    pub application_id: Option<Uuid>,
    pub cidr: String,
    /// `blacklist` or `whitelist`
    pub filter_type: String,
    pub description: Option<String>,
}

/// `POST /api/admin/ip-filters`
pub async fn create_ip_filter(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateIpFilterRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();

    if body.filter_type != "blacklist" && body.filter_type != "whitelist" {
        return Err(ApiError::BadRequest {
            message: "filter_type must be blacklist or whitelist".to_string(),
        });
    }

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, body.application_id)?;

    let filter = state
        .applications
        .add_ip_filter(
            body.application_id,
            &body.cidr,
            &body.filter_type,
            body.description.as_deref(),
        )
        .await?;

    Ok(HttpResponse::Created().json(filter))
}

/// `DELETE /api/admin/ip-filters/{id}`
pub async fn delete_ip_filter(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    state.applications.remove_ip_filter(path.into_inner()).await?;

    Ok(HttpResponse::NoContent().finish())
}

/// `POST /api/admin/users/{id}/ban` - ban a user in one application.
#[derive(Debug, serde::Deserialize)]
pub struct BanRequest {
    pub application_id: Uuid,
    pub reason: Option<String>,
}

pub async fn ban_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<BanRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, Some(body.application_id))?;

    state
        .identity
        .ban_profile(
            user_id,
            body.application_id,
            body.reason.as_deref(),
            ctx.caller.user_id(),
        )
        .await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.profile_banned")
                .application(Some(body.application_id))
                .target(format!("user:{user_id}")),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("profile banned")))
}

// =============================================================================
// SIGNING KEYS
// =============================================================================

/// `GET /api/admin/keys` - loaded kids, current first, plus the JWKS.
pub async fn list_keys(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "kids": state.tokens.keys().kids(),
        "jwks": state.tokens.keys().jwks(),
    })))
}

/// `POST /api/admin/keys/rotate` - generate a key of the configured
/// algorithm and make it current. The previous key keeps verifying
/// until removed; retain it for at least the refresh-token TTL.
pub async fn rotate_key(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    let algorithm =
        shared::crypto::keys::KeyAlgorithm::parse(&state.config.keys.algorithm)
            .map_err(ApiError::from)?;
    let kid = state.tokens.keys().rotate(algorithm).map_err(ApiError::from)?;

    state
        .audit
        .record(AuditRecord::success("admin.key_rotated").target(format!("kid:{kid}")))
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "kid": kid })))
}

/// `DELETE /api/admin/keys/{kid}` - drop a retired key. Tokens signed
/// with it stop verifying immediately.
pub async fn remove_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let kid = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    state.tokens.keys().remove(&kid).map_err(ApiError::from)?;

    state
        .audit
        .record(AuditRecord::success("admin.key_removed").target(format!("kid:{kid}")))
        .await;

    Ok(HttpResponse::NoContent().finish())
}

// =============================================================================
// OAUTH CLIENTS
// =============================================================================

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct CreateOauthClientRequest {
    #[validate(length(min = 1, max = 128, message = "Name is required"))]
    pub name: String,

    /// `confidential` or `public`
    pub client_type: String,

    #[validate(length(min = 1, message = "At least one redirect URI is required"))]
    pub redirect_uris: Vec<String>,

    #[serde(default)]
    pub allowed_grant_types: Vec<String>,

    #[serde(default)]
    pub allowed_scopes: Vec<String>,

    #[serde(default)]
    pub require_pkce: bool,

    #[serde(default)]
    pub first_party: bool,
}

/// `POST /api/admin/oauth-clients`
///
/// Confidential clients get a generated secret, shown exactly once;
/// public clients get none and live on PKCE.
pub async fn create_oauth_client(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateOauthClientRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    if body.client_type != "confidential" && body.client_type != "public" {
        return Err(ApiError::BadRequest {
            message: "client_type must be confidential or public".to_string(),
        });
    }

    let client_id = format!("agw-client-{}", uuid::Uuid::new_v4().simple());

    let secret = if body.client_type == "confidential" {
        Some(TokenService::new_opaque_token())
    } else {
        None
    };
    let secret_hash = secret.as_deref().map(api_key::hash_credential);

    let client = state
        .oauth_repo
        .create_client(
            &client_id,
            secret_hash.as_deref(),
            &body.name,
            &body.client_type,
            &body.redirect_uris,
            &body.allowed_grant_types,
            &body.allowed_scopes,
            body.require_pkce,
            body.first_party,
        )
        .await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.oauth_client_created")
                .target(format!("oauth_client:{client_id}")),
        )
        .await;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "client": client,
        "client_secret": secret,
    })))
}

// =============================================================================
// SAML SERVICE PROVIDERS
// =============================================================================

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct CreateSamlSpRequest {
    pub application_id: Option<Uuid>,

    #[validate(length(min = 1, message = "entity_id is required"))]
    pub entity_id: String,

    #[validate(url(message = "Invalid ACS URL"))]
    pub acs_url: String,

    #[validate(url(message = "Invalid SLO URL"))]
    pub slo_url: Option<String>,

    /// SP signing public key (SPKI PEM); omit to skip request
    /// signature verification
    pub public_key_pem: Option<String>,

    /// attribute name -> user field (email, username, phone, user_id)
    #[serde(default)]
    pub attribute_mappings: serde_json::Value,
}

/// `POST /api/admin/saml/service-providers`
pub async fn create_saml_sp(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateSamlSpRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, body.application_id)?;

    let sp = state
        .sso_repo
        .create_sp(
            body.application_id,
            &body.entity_id,
            &body.acs_url,
            body.slo_url.as_deref(),
            body.public_key_pem.as_deref(),
            &body.attribute_mappings,
        )
        .await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.saml_sp_created")
                .target(format!("saml_sp:{}", sp.entity_id)),
        )
        .await;

    Ok(HttpResponse::Created().json(sp))
}

// =============================================================================
// USERS & ROLES
// =============================================================================

/// `POST /api/admin/users/{id}/unban`
pub async fn unban_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<BanRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, Some(body.application_id))?;

    state
        .identity
        .unban_profile(user_id, body.application_id)
        .await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.profile_unbanned")
                .application(Some(body.application_id))
                .target(format!("user:{user_id}")),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("profile unbanned")))
}

/// `POST /api/admin/users/{id}/deactivate` - global, fires
/// `user.deactivated`.
pub async fn deactivate_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    state.identity.deactivate_user(user_id).await?;
    // Deactivation also ends every session
    state.sessions.revoke_all(user_id).await?;

    state
        .audit
        .record(AuditRecord::success("admin.user_deactivated").target(format!("user:{user_id}")))
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("user deactivated")))
}

/// `DELETE /api/admin/users/{id}` - soft delete, fires `user.deleted`.
pub async fn delete_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    state.sessions.revoke_all(user_id).await?;
    state.identity.delete_user(user_id).await?;

    state
        .audit
        .record(AuditRecord::success("admin.user_deleted").target(format!("user:{user_id}")))
        .await;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct CreateRoleRequest {
    pub application_id: Option<Uuid>,

    #[validate(length(min = 1, max = 64, message = "Name is required"))]
    pub name: String,

    pub description: Option<String>,
}

/// `POST /api/admin/roles`
pub async fn create_role(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, body.application_id)?;

    let role = state
        .roles
        .create_role(body.application_id, &body.name, body.description.as_deref())
        .await?;

    Ok(HttpResponse::Created().json(role))
}

#[derive(Debug, serde::Deserialize)]
pub struct AssignRoleRequest {
    pub role_name: String,
    pub application_id: Option<Uuid>,
}

/// `POST /api/admin/users/{id}/roles` - assign by role name.
pub async fn assign_role(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<AssignRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, body.application_id)?;

    let role = state
        .roles
        .find_role(&body.role_name, body.application_id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: format!("role:{}", body.role_name),
        })?;

    state.identity.assign_role(user_id, role.id).await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.role_assigned")
                .application(body.application_id)
                .target(format!("user:{user_id} role:{}", body.role_name)),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("role assigned")))
}

/// `DELETE /api/admin/users/{id}/roles` - revoke by role name.
pub async fn revoke_role(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<AssignRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, body.application_id)?;

    let role = state
        .roles
        .find_role(&body.role_name, body.application_id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: format!("role:{}", body.role_name),
        })?;

    state.identity.revoke_role(user_id, role.id).await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.role_revoked")
                .application(body.application_id)
                .target(format!("user:{user_id} role:{}", body.role_name)),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("role revoked")))
}

#[derive(Debug, serde::Deserialize, validator::Validate)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, max = 64, message = "Name is required"))]
    pub name: String,

    #[validate(length(min = 1, max = 64, message = "Resource is required"))]
    pub resource: String,

    #[validate(length(min = 1, max = 64, message = "Action is required"))]
    pub action: String,

    /// Roles (by id) to attach the permission to immediately
    #[serde(default)]
    pub role_ids: Vec<Uuid>,
}

/// `POST /api/admin/permissions`
pub async fn create_permission(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreatePermissionRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    let permission = state
        .roles
        .create_permission(&body.name, &body.resource, &body.action)
        .await?;

    for role_id in &body.role_ids {
        state.roles.attach_permission(*role_id, permission.id).await?;
    }

    Ok(HttpResponse::Created().json(permission))
}

/// `GET /api/admin/saml/service-providers`
pub async fn list_saml_sps(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    let sps = state.sso_repo.list_sps().await?;

    Ok(HttpResponse::Ok().json(sps))
}

/// `GET /api/admin/users/{id}/audit` - recent audit entries.
pub async fn user_audit(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, None)?;

    let entries = state.audit.list_for_user(path.into_inner(), 100).await?;

    Ok(HttpResponse::Ok().json(entries))
}

#[derive(Debug, serde::Deserialize)]
pub struct SetProfileRolesRequest {
    pub application_id: Uuid,
    pub app_roles: Vec<String>,
}

/// `PUT /api/admin/users/{id}/profile-roles` - replace the app-role
/// list on one profile.
pub async fn set_profile_roles(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<SetProfileRolesRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    require_admin(&ctx, Some(body.application_id))?;

    state
        .identity
        .set_profile_app_roles(user_id, body.application_id, &body.app_roles)
        .await?;

    state
        .audit
        .record(
            AuditRecord::success("admin.profile_roles_set")
                .application(Some(body.application_id))
                .target(format!("user:{user_id}")),
        )
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("profile roles updated")))
}
