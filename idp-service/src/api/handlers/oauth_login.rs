//! # OAuth Consumer Handlers
//!
//! `GET /api/auth/{provider}` kicks the browser to the upstream
//! provider; `GET|POST /api/auth/{provider}/callback` completes the
//! sign-in and returns tokens. Telegram's login widget posts its signed
//! fields instead of a code.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use shared::errors::ApiError;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::api::client_info::{extract_client_context, resolve_device_id};
use crate::api::dto::AuthResponseDto;
use crate::domain::AuthMethod;
use crate::policy::PolicyGate;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OauthStartQuery {
    pub application_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct OauthCallbackQuery {
    pub state: String,
    pub code: Option<String>,
    /// Provider-reported error (user denied, etc.)
    pub error: Option<String>,
}

/// `GET /api/auth/{provider}` - 302 to the provider.
pub async fn start(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<OauthStartQuery>,
) -> Result<HttpResponse, ApiError> {
    let provider = path.into_inner();

    let method = AuthMethod::from_oauth_provider(&provider).ok_or_else(|| ApiError::NotFound {
        resource: format!("oauth provider:{provider}"),
    })?;

    let client = extract_client_context(&req);
    let application = state
        .gate
        .public_context(query.application_id, &client)
        .await?;
    PolicyGate::require_method(&application, method)?;

    let redirect = state.oauth_login.start(&provider, &application).await?;

    Ok(HttpResponse::Found()
        .insert_header(("Location", redirect))
        .finish())
}

/// `GET|POST /api/auth/{provider}/callback`
pub async fn callback(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<OauthCallbackQuery>,
) -> Result<HttpResponse, ApiError> {
    let provider = path.into_inner();

    if let Some(error) = &query.error {
        return Err(ApiError::BadRequest {
            message: format!("provider returned an error: {error}"),
        });
    }

    let code = query.code.as_deref().ok_or(ApiError::BadRequest {
        message: "missing authorization code".to_string(),
    })?;

    let client = extract_client_context(&req);
    let device = resolve_device_id(&req, &state.config.server.cookie_domain);

    let outcome = state
        .oauth_login
        .callback(&provider, &query.state, code, Some(&device.device_id), &client)
        .await?;

    let mut response = HttpResponse::Ok();
    if let Some(cookie) = device.set_cookie {
        response.cookie(cookie);
    }
    Ok(response.json(AuthResponseDto::new(outcome.tokens, outcome.user)))
}

/// `POST /api/auth/telegram/callback` - the login widget posts its
/// signed fields plus our state.
pub async fn telegram_callback(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<BTreeMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let mut fields = form.into_inner();

    let state_nonce = fields.remove("state").ok_or(ApiError::BadRequest {
        message: "missing state".to_string(),
    })?;

    let client = extract_client_context(&req);
    let device = resolve_device_id(&req, &state.config.server.cookie_domain);

    let outcome = state
        .oauth_login
        .telegram_callback(&state_nonce, &fields, Some(&device.device_id), &client)
        .await?;

    let mut response = HttpResponse::Ok();
    if let Some(cookie) = device.set_cookie {
        response.cookie(cookie);
    }
    Ok(response.json(AuthResponseDto::new(outcome.tokens, outcome.user)))
}
