//! # SAML Handlers
//!
//! Metadata, SSO and SLO. Responses are delivered as auto-submitting
//! HTML forms POSTing to the SP, per the HTTP-POST binding.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use shared::errors::ApiError;

use crate::api::handlers::auth::authenticate;
use crate::service::saml_service::SamlPostForm;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SamlRequestForm {
    #[serde(rename = "SAMLRequest")]
    pub saml_request: String,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
    #[serde(rename = "SigAlg")]
    pub sig_alg: Option<String>,
    #[serde(rename = "Signature")]
    pub signature: Option<String>,
}

/// `GET /saml/metadata`
pub async fn metadata(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/samlmetadata+xml")
        .body(state.saml.metadata())
}

/// `POST /saml/sso`
pub async fn sso(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<SamlRequestForm>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    let user = state
        .identity
        .users()
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::TokenInvalid)?;

    let post_form = state
        .saml
        .handle_sso(
            &user,
            &form.saml_request,
            form.relay_state.as_deref(),
            form.sig_alg.as_deref(),
            form.signature.as_deref(),
        )
        .await?;

    Ok(render_post_form(post_form))
}

/// `POST /saml/slo`
pub async fn slo(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<SamlRequestForm>,
) -> Result<HttpResponse, ApiError> {
    let ctx = authenticate(&req, &state).await?;
    let claims = ctx.require_user()?;

    let user = state
        .identity
        .users()
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::TokenInvalid)?;

    let post_form = state
        .saml
        .handle_slo(
            &user,
            &form.saml_request,
            form.relay_state.as_deref(),
            form.sig_alg.as_deref(),
            form.signature.as_deref(),
        )
        .await?;

    Ok(render_post_form(post_form))
}

/// Renders the auto-submitting POST form carrying the SAMLResponse.
fn render_post_form(form: SamlPostForm) -> HttpResponse {
    let relay_input = form
        .relay_state
        .map(|rs| {
            format!(
                r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                html_escape(&rs)
            )
        })
        .unwrap_or_default();

    let body = format!(
        r#"<!DOCTYPE html>
<html>
<body onload="document.forms[0].submit()">
<noscript><p>Click Continue to finish signing in.</p></noscript>
<form method="post" action="{action}">
<input type="hidden" name="SAMLResponse" value="{response}"/>
{relay_input}
<noscript><button type="submit">Continue</button></noscript>
</form>
</body>
</html>"#,
        action = html_escape(&form.action_url),
        response = html_escape(&form.saml_response),
    );

    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escaping() {
        assert_eq!(html_escape(r#"a&"<b>"#), "a&amp;&quot;&lt;b&gt;");
    }

    #[test]
    fn test_post_form_renders() {
        let form = SamlPostForm {
            action_url: "https://sp.example.com/acs?a=1&b=2".into(),
            saml_response: "PHNhbWw+".into(),
            relay_state: Some("rs".into()),
        };

        let response = render_post_form(form);
        assert_eq!(response.status(), actix_web::http::StatusCode::OK);
    }
}
