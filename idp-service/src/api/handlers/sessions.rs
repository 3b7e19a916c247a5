//! # Session Management Handlers
//!
//! Listing and revoking the caller's own sessions. Revocation is
//! immediate: the session row dies and the paired access token joins
//! the blacklist.

use actix_web::{web, HttpRequest, HttpResponse};
use shared::errors::ApiError;
use uuid::Uuid;

use crate::api::dto::SessionListResponse;
use crate::api::handlers::auth::authenticate;
use crate::AppState;

/// `GET /api/sessions` - all active sessions for the caller.
pub async fn list_sessions(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    let sessions = state.sessions.list(claims.sub).await?;

    Ok(HttpResponse::Ok().json(SessionListResponse { sessions }))
}

/// `DELETE /api/sessions/{id}` - revoke one session.
///
/// Only the session owner may revoke it.
pub async fn revoke_session(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let session_id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    let session = state
        .sessions
        .repository()
        .find_by_id(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: format!("session:{session_id}"),
        })?;

    if session.user_id != claims.sub {
        return Err(ApiError::AccessDenied);
    }

    state.sessions.revoke(session_id).await?;

    Ok(HttpResponse::NoContent().finish())
}

/// `POST /api/sessions/device/{device_id}` - revoke every session for
/// one of the caller's devices. 204 on success.
pub async fn revoke_device(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let device_id = path.into_inner();

    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    state.sessions.revoke_by_device(claims.sub, &device_id).await?;

    Ok(HttpResponse::NoContent().finish())
}

/// `POST /api/sessions/revoke-all` - logout everywhere.
pub async fn revoke_all(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    let revoked = state.sessions.revoke_all(claims.sub).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "revoked": revoked })))
}
