//! # OIDC / OAuth Provider Handlers
//!
//! Discovery, JWKS, authorize, token, introspect, revoke, userinfo and
//! the device grant. The `/oauth` surface speaks RFC shapes: form
//! bodies in, `{"error": "..."}` bodies out.

use actix_web::{web, HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use shared::errors::ApiError;

use crate::api::handlers::auth::authenticate;
use crate::service::oidc_provider_service::{AuthorizeOutcome, AuthorizeRequest};
use crate::AppState;

// =============================================================================
// ERROR SHAPE
// =============================================================================

/// Maps our taxonomy onto RFC 6749 / 8628 error codes.
fn oauth_error_response(error: ApiError) -> HttpResponse {
    let (status, code) = match &error {
        ApiError::Conflict { .. } => (actix_web::http::StatusCode::BAD_REQUEST, "invalid_grant"),
        ApiError::InvalidCredentials => {
            (actix_web::http::StatusCode::BAD_REQUEST, "invalid_grant")
        }
        ApiError::BadRequest { message } if message == "authorization_pending" => (
            actix_web::http::StatusCode::BAD_REQUEST,
            "authorization_pending",
        ),
        ApiError::RateLimited { .. } => {
            (actix_web::http::StatusCode::BAD_REQUEST, "slow_down")
        }
        ApiError::AccessDenied => (actix_web::http::StatusCode::BAD_REQUEST, "access_denied"),
        ApiError::TokenExpired => (actix_web::http::StatusCode::BAD_REQUEST, "expired_token"),
        ApiError::InsufficientScope { .. } => {
            (actix_web::http::StatusCode::BAD_REQUEST, "invalid_scope")
        }
        ApiError::BadRequest { .. } | ApiError::ValidationError(_) => (
            actix_web::http::StatusCode::BAD_REQUEST,
            "invalid_request",
        ),
        _ => (
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
        ),
    };

    HttpResponse::build(status).json(serde_json::json!({
        "error": code,
        "error_description": error.to_string(),
    }))
}

// =============================================================================
// DISCOVERY & JWKS
// =============================================================================

/// `GET /.well-known/openid-configuration`
pub async fn discovery(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.oidc.discovery_document())
}

/// `GET /.well-known/jwks.json`
pub async fn jwks(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.tokens.keys().jwks())
}

// =============================================================================
// AUTHORIZE
// =============================================================================

/// `GET /oauth/authorize` - requires an authenticated user (product
/// backends proxy the user's access token through).
pub async fn authorize(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<AuthorizeRequest>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    let user = state
        .identity
        .users()
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::TokenInvalid)?;

    match state.oidc.authorize(&query, &user).await? {
        AuthorizeOutcome::Redirect(url) => Ok(HttpResponse::Found()
            .insert_header(("Location", url))
            .finish()),
        AuthorizeOutcome::ConsentRequired {
            client_id,
            client_name,
            scopes,
        } => Ok(HttpResponse::Ok().json(serde_json::json!({
            "consent_required": true,
            "client_id": client_id,
            "client_name": client_name,
            "scopes": scopes,
        }))),
    }
}

/// `POST /oauth/consent` - the product's consent screen calls back with
/// the user's approval; responds with the code redirect URL.
pub async fn consent(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<AuthorizeRequest>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    let user = state
        .identity
        .users()
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::TokenInvalid)?;

    let url = state.oidc.grant_consent(&body, &user).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "redirect_url": url })))
}

// =============================================================================
// TOKEN
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub device_code: Option<String>,
}

/// Client credentials from the Basic header, falling back to the form.
fn client_auth(req: &HttpRequest, form: &TokenForm) -> Result<(String, Option<String>), ApiError> {
    if let Some(basic) = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
    {
        let decoded = BASE64
            .decode(basic)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .ok_or(ApiError::InvalidCredentials)?;
        let (id, secret) = decoded.split_once(':').ok_or(ApiError::InvalidCredentials)?;
        return Ok((id.to_string(), Some(secret.to_string())));
    }

    let client_id = form.client_id.clone().ok_or(ApiError::BadRequest {
        message: "client_id is required".to_string(),
    })?;

    Ok((client_id, form.client_secret.clone()))
}

/// `POST /oauth/token` - all grants.
pub async fn token(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<TokenForm>,
) -> HttpResponse {
    let form = form.into_inner();

    let result = async {
        let (client_id, client_secret) = client_auth(&req, &form)?;

        match form.grant_type.as_str() {
            "authorization_code" => {
                let code = form.code.as_deref().ok_or(missing("code"))?;
                let redirect_uri = form.redirect_uri.as_deref().ok_or(missing("redirect_uri"))?;
                state
                    .oidc
                    .exchange_code(
                        &client_id,
                        client_secret.as_deref(),
                        code,
                        redirect_uri,
                        form.code_verifier.as_deref(),
                    )
                    .await
            }
            "refresh_token" => {
                let refresh = form
                    .refresh_token
                    .as_deref()
                    .ok_or(missing("refresh_token"))?;
                state
                    .oidc
                    .refresh_grant(&client_id, client_secret.as_deref(), refresh)
                    .await
            }
            "urn:ietf:params:oauth:grant-type:device_code" => {
                let device_code = form.device_code.as_deref().ok_or(missing("device_code"))?;
                state.oidc.device_token(&client_id, device_code).await
            }
            other => Err(ApiError::BadRequest {
                message: format!("unsupported grant_type: {other}"),
            }),
        }
    }
    .await;

    match result {
        Ok(grant) => HttpResponse::Ok().json(grant),
        Err(error) => oauth_error_response(error),
    }
}

fn missing(field: &str) -> ApiError {
    ApiError::BadRequest {
        message: format!("{field} is required"),
    }
}

// =============================================================================
// INTROSPECT / REVOKE / USERINFO
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TokenOnlyForm {
    pub token: String,
}

/// `POST /oauth/introspect`
pub async fn introspect(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<TokenOnlyForm>,
) -> Result<HttpResponse, ApiError> {
    // Introspection callers must themselves be authenticated
    authenticate(&req, &state).await?;

    let response = state.oidc.introspect(&form.token).await?;

    Ok(HttpResponse::Ok().json(response))
}

/// `POST /oauth/revoke`
pub async fn revoke(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<TokenOnlyForm>,
) -> Result<HttpResponse, ApiError> {
    authenticate(&req, &state).await?;

    state.oidc.revoke(&form.token).await?;

    // RFC 7009: 200 regardless
    Ok(HttpResponse::Ok().finish())
}

/// `GET /oauth/userinfo` - bearer is an OAuth access token.
pub async fn userinfo(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::MissingAuth)?;

    let response = state.oidc.userinfo(token).await?;

    Ok(HttpResponse::Ok().json(response))
}

// =============================================================================
// DEVICE GRANT
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DeviceAuthForm {
    pub client_id: String,
    #[serde(default)]
    pub scope: String,
}

/// `POST /oauth/device`
pub async fn device_authorize(
    state: web::Data<AppState>,
    form: web::Form<DeviceAuthForm>,
) -> HttpResponse {
    match state.oidc.device_authorize(&form.client_id, &form.scope).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(error) => oauth_error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceResolveRequest {
    pub user_code: String,
    pub approve: bool,
}

/// `POST /oauth/device/resolve` - the signed-in user approves or denies
/// a user code.
pub async fn device_resolve(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<DeviceResolveRequest>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    let user = state
        .identity
        .users()
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::TokenInvalid)?;

    state
        .oidc
        .resolve_user_code(&body.user_code, &user, body.approve)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "resolved": true,
        "approved": body.approve,
    })))
}
