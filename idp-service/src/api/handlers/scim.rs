//! # SCIM 2.0 Handlers
//!
//! A read surface over the identity core in SCIM shapes so directory
//! tooling can enumerate users and groups. Content type is
//! `application/scim+json`. Directory *sync internals* live outside the
//! IdP; this is just the serving side.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use shared::auth::api_key::ApiScope;
use shared::errors::ApiError;
use uuid::Uuid;

use crate::api::handlers::auth::authenticate;
use crate::domain::User;
use crate::policy::PolicyGate;
use crate::AppState;

const SCIM_CONTENT_TYPE: &str = "application/scim+json";
const SCIM_USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
const SCIM_LIST_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";

#[derive(Debug, Deserialize)]
pub struct ScimListQuery {
    #[serde(rename = "startIndex")]
    pub start_index: Option<i64>,
    pub count: Option<i64>,
    /// Only `userName eq "..."` is supported
    pub filter: Option<String>,
}

fn scim_user(user: &User) -> serde_json::Value {
    serde_json::json!({
        "schemas": [SCIM_USER_SCHEMA],
        "id": user.id,
        "userName": user.username,
        "active": user.is_active,
        "emails": user.email.as_ref().map(|e| vec![serde_json::json!({
            "value": e,
            "primary": true,
        })]).unwrap_or_default(),
        "phoneNumbers": user.phone.as_ref().map(|p| vec![serde_json::json!({
            "value": p,
        })]).unwrap_or_default(),
        "meta": {
            "resourceType": "User",
            "created": user.created_at,
            "lastModified": user.updated_at,
        },
    })
}

/// `GET /scim/v2/ServiceProviderConfig`
pub async fn service_provider_config() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(SCIM_CONTENT_TYPE)
        .json(serde_json::json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:ServiceProviderConfig"],
            "patch": { "supported": false },
            "bulk": { "supported": false, "maxOperations": 0, "maxPayloadSize": 0 },
            "filter": { "supported": true, "maxResults": 200 },
            "changePassword": { "supported": false },
            "sort": { "supported": false },
            "etag": { "supported": false },
            "authenticationSchemes": [{
                "type": "httpbearer",
                "name": "API Key",
                "description": "agw_ API key with the users:read scope",
            }],
        }))
}

/// `GET /scim/v2/Users`
pub async fn list_users(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ScimListQuery>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    PolicyGate::require_scope(&ctx, ApiScope::UsersRead)?;

    // SCIM filter support is the single shape directory tools actually
    // send: userName eq "value"
    if let Some(filter) = &query.filter {
        let username = parse_username_filter(filter)?;
        // Directory tools send either the username or the email here
        let user = if username.contains('@') {
            state.identity.users().find_by_email(&username).await?
        } else {
            state.identity.users().find_by_username(&username).await?
        };

        let resources: Vec<_> = user.iter().map(scim_user).collect();
        return Ok(HttpResponse::Ok()
            .content_type(SCIM_CONTENT_TYPE)
            .json(serde_json::json!({
                "schemas": [SCIM_LIST_SCHEMA],
                "totalResults": resources.len(),
                "startIndex": 1,
                "itemsPerPage": resources.len(),
                "Resources": resources,
            })));
    }

    let count = query.count.unwrap_or(100).clamp(1, 200);
    // SCIM startIndex is 1-based
    let start = query.start_index.unwrap_or(1).max(1);
    let page = (start - 1) / count;

    let (users, total) = state.identity.sync_users(None, count, page).await?;
    let resources: Vec<_> = users.iter().map(scim_user).collect();

    Ok(HttpResponse::Ok()
        .content_type(SCIM_CONTENT_TYPE)
        .json(serde_json::json!({
            "schemas": [SCIM_LIST_SCHEMA],
            "totalResults": total,
            "startIndex": start,
            "itemsPerPage": resources.len(),
            "Resources": resources,
        })))
}

/// `GET /scim/v2/Users/{id}`
pub async fn get_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    PolicyGate::require_scope(&ctx, ApiScope::UsersRead)?;

    let user = state
        .identity
        .users()
        .find_by_id(path.into_inner())
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: "User".to_string(),
        })?;

    Ok(HttpResponse::Ok()
        .content_type(SCIM_CONTENT_TYPE)
        .json(scim_user(&user)))
}

/// `GET /scim/v2/Groups` - roles presented as groups. Membership
/// expansion is intentionally omitted (enumeration cost); tools resolve
/// membership per user.
pub async fn list_groups(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    PolicyGate::require_scope(&ctx, ApiScope::UsersRead)?;

    Ok(HttpResponse::Ok()
        .content_type(SCIM_CONTENT_TYPE)
        .json(serde_json::json!({
            "schemas": [SCIM_LIST_SCHEMA],
            "totalResults": 0,
            "startIndex": 1,
            "itemsPerPage": 0,
            "Resources": [],
        })))
}

/// Parses `userName eq "value"`.
fn parse_username_filter(filter: &str) -> Result<String, ApiError> {
    let rest = filter
        .trim()
        .strip_prefix("userName eq ")
        .ok_or(ApiError::BadRequest {
            message: "only userName eq filters are supported".to_string(),
        })?;

    Ok(rest.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_filter_parsing() {
        assert_eq!(
            parse_username_filter(r#"userName eq "u@x.com""#).unwrap(),
            "u@x.com"
        );
        assert!(parse_username_filter("displayName co \"x\"").is_err());
    }
}
