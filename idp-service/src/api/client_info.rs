//! # Client Context Extraction
//!
//! Pulls the caller's IP, user agent and device id out of the HTTP
//! request into explicit values the services take as parameters.
//!
//! ## Device-ID Resolution (REST)
//!
//! Priority: `X-Device-ID` header → `agw_device_id` cookie → generate a
//! fresh UUID and set the cookie (HttpOnly, Secure, SameSite=Lax,
//! Max-Age two years). The device id is what enables per-device session
//! reuse; gRPC callers without `x-device-id` metadata simply get no
//! reuse.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::HttpRequest;
use uuid::Uuid;

use crate::service::session_service::ClientContext;

/// Cookie carrying the stable device id.
pub const DEVICE_COOKIE: &str = "agw_device_id";
/// Header override for clients that manage their own device id.
pub const DEVICE_HEADER: &str = "X-Device-ID";

/// Device id plus the cookie to set when one was generated.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub device_id: String,
    /// Present only when a fresh id was minted this request
    pub set_cookie: Option<Cookie<'static>>,
}

/// Resolves the device id per the priority chain.
pub fn resolve_device_id(req: &HttpRequest, cookie_domain: &str) -> ResolvedDevice {
    if let Some(header) = req
        .headers()
        .get(DEVICE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
    {
        return ResolvedDevice {
            device_id: header.trim().to_string(),
            set_cookie: None,
        };
    }

    if let Some(cookie) = req.cookie(DEVICE_COOKIE) {
        let value = cookie.value().trim().to_string();
        if !value.is_empty() {
            return ResolvedDevice {
                device_id: value,
                set_cookie: None,
            };
        }
    }

    let device_id = Uuid::new_v4().to_string();

    let mut builder = Cookie::build(DEVICE_COOKIE, device_id.clone())
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::days(730));

    // Empty domain = current host
    if !cookie_domain.is_empty() {
        builder = builder.domain(cookie_domain.to_string());
    }

    ResolvedDevice {
        device_id,
        set_cookie: Some(builder.finish()),
    }
}

/// Builds the [`ClientContext`] from forwarded-for/peer address and the
/// user agent.
pub fn extract_client_context(req: &HttpRequest) -> ClientContext {
    let ip_address = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        // First hop in the chain is the client
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()));

    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    ClientContext {
        ip_address,
        user_agent,
    }
}

/// Pulls the raw credential for the policy gate: `Authorization: Bearer`
/// value, `X-API-Key`, or `X-Application-Secret` - whichever is present.
pub fn extract_credential(req: &HttpRequest) -> Option<String> {
    if let Some(bearer) = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }

    if let Some(key) = req.headers().get("X-API-Key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }

    req.headers()
        .get("X-Application-Secret")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Parses `X-Application-ID` when present.
pub fn extract_stated_application(req: &HttpRequest) -> Result<Option<Uuid>, shared::ApiError> {
    match req
        .headers()
        .get("X-Application-ID")
        .and_then(|v| v.to_str().ok())
    {
        Some(raw) => Uuid::parse_str(raw.trim())
            .map(Some)
            .map_err(|_| shared::ApiError::InvalidUuid),
        None => Ok(None),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_header_beats_cookie() {
        let req = TestRequest::default()
            .insert_header((DEVICE_HEADER, "from-header"))
            .cookie(Cookie::new(DEVICE_COOKIE, "from-cookie"))
            .to_http_request();

        let resolved = resolve_device_id(&req, "");
        assert_eq!(resolved.device_id, "from-header");
        assert!(resolved.set_cookie.is_none());
    }

    #[test]
    fn test_cookie_when_no_header() {
        let req = TestRequest::default()
            .cookie(Cookie::new(DEVICE_COOKIE, "D1"))
            .to_http_request();

        let resolved = resolve_device_id(&req, "");
        assert_eq!(resolved.device_id, "D1");
        assert!(resolved.set_cookie.is_none());
    }

    #[test]
    fn test_generates_and_sets_cookie() {
        let req = TestRequest::default().to_http_request();

        let resolved = resolve_device_id(&req, "");
        assert!(Uuid::parse_str(&resolved.device_id).is_ok());

        let cookie = resolved.set_cookie.expect("cookie should be set");
        assert_eq!(cookie.name(), DEVICE_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(CookieDuration::days(730)));
        // No explicit domain: scoped to the current host
        assert_eq!(cookie.domain(), None);
    }

    #[test]
    fn test_cookie_domain_applied_when_configured() {
        let req = TestRequest::default().to_http_request();
        let resolved = resolve_device_id(&req, "auth.example.com");
        assert_eq!(
            resolved.set_cookie.unwrap().domain(),
            Some("auth.example.com")
        );
    }

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "203.0.113.9, 10.0.0.1"))
            .insert_header(("User-Agent", "curl/8"))
            .to_http_request();

        let ctx = extract_client_context(&req);
        assert_eq!(ctx.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn test_credential_priority() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer tok"))
            .insert_header(("X-API-Key", "agw_key"))
            .to_http_request();
        assert_eq!(extract_credential(&req).as_deref(), Some("tok"));

        let req = TestRequest::default()
            .insert_header(("X-API-Key", "agw_key"))
            .to_http_request();
        assert_eq!(extract_credential(&req).as_deref(), Some("agw_key"));

        let req = TestRequest::default()
            .insert_header(("X-Application-Secret", "app_sec"))
            .to_http_request();
        assert_eq!(extract_credential(&req).as_deref(), Some("app_sec"));
    }

    #[test]
    fn test_stated_application_parses_or_rejects() {
        let id = Uuid::new_v4();
        let req = TestRequest::default()
            .insert_header(("X-Application-ID", id.to_string()))
            .to_http_request();
        assert_eq!(extract_stated_application(&req).unwrap(), Some(id));

        let req = TestRequest::default()
            .insert_header(("X-Application-ID", "garbage"))
            .to_http_request();
        assert!(extract_stated_application(&req).is_err());
    }
}
