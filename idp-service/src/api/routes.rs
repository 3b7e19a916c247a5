//! # Route Configuration
//!
//! Exact paths for the REST surface.
//!
//! ```text
//! /
//! ├── health                               GET  → health_check
//! ├── .well-known/
//! │   ├── openid-configuration             GET  → oidc::discovery
//! │   └── jwks.json                        GET  → oidc::jwks
//! ├── api/auth/
//! │   ├── signup | signin | refresh | logout           POST
//! │   ├── 2fa/verify | 2fa/enable[/confirm] | 2fa/disable  POST
//! │   ├── otp/send | otp/verify | otp/login | otp/login/verify  POST
//! │   ├── passwordless/init | passwordless/complete    POST
//! │   ├── password/forgot | password/reset | password/change  POST
//! │   ├── token/exchange | token/exchange/redeem       POST
//! │   ├── telegram/callback                            POST
//! │   └── {provider} | {provider}/callback             GET/POST
//! ├── api/sessions                          GET, DELETE /{id},
//! │                                         POST /device/{device_id}, /revoke-all
//! ├── api/applications/{id}/auth-config     GET (public)
//! ├── api/admin/...                         applications, api-keys,
//! │                                         webhooks, ip-filters, users/{id}/ban
//! ├── oauth/                                authorize, token, introspect,
//! │                                         revoke, userinfo, device[, consent]
//! ├── saml/                                 metadata, sso, slo
//! └── scim/v2/                              Users, Groups, ServiceProviderConfig
//! ```
//!
//! Note the registration order under `api/auth`: the literal segments
//! must be registered before the `{provider}` catch-alls.

use actix_web::web;

use super::handlers::{admin, auth, oauth_login, oidc, saml, scim, sessions};

/// Configures all routes for the IdP.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // ─────────────────────────────────────────────────────────────────
        // Health & well-known
        // ─────────────────────────────────────────────────────────────────
        .route("/health", web::get().to(auth::health_check))
        .route(
            "/.well-known/openid-configuration",
            web::get().to(oidc::discovery),
        )
        .route("/.well-known/jwks.json", web::get().to(oidc::jwks))
        // ─────────────────────────────────────────────────────────────────
        // Auth API
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/api/auth")
                .route("/signup", web::post().to(auth::signup))
                .route("/signin", web::post().to(auth::signin))
                .route("/refresh", web::post().to(auth::refresh))
                .route("/logout", web::post().to(auth::logout))
                .route("/2fa/verify", web::post().to(auth::two_factor_verify))
                .route("/2fa/enable", web::post().to(auth::totp_enable))
                .route(
                    "/2fa/enable/confirm",
                    web::post().to(auth::totp_enable_confirm),
                )
                .route("/2fa/disable", web::post().to(auth::totp_disable))
                .route("/otp/send", web::post().to(auth::otp_send))
                .route("/otp/verify", web::post().to(auth::otp_verify))
                .route("/otp/login", web::post().to(auth::otp_login))
                .route("/otp/login/verify", web::post().to(auth::otp_login_verify))
                .route(
                    "/passwordless/init",
                    web::post().to(auth::passwordless_init),
                )
                .route(
                    "/passwordless/complete",
                    web::post().to(auth::passwordless_complete),
                )
                .route("/password/forgot", web::post().to(auth::forgot_password))
                .route("/password/reset", web::post().to(auth::reset_password))
                .route("/password/change", web::post().to(auth::change_password))
                .route("/token/exchange", web::post().to(auth::token_exchange))
                .route(
                    "/token/exchange/redeem",
                    web::post().to(auth::token_exchange_redeem),
                )
                // Telegram posts widget fields; other providers use the
                // code callback below
                .route(
                    "/telegram/callback",
                    web::post().to(oauth_login::telegram_callback),
                )
                .route(
                    "/{provider}/callback",
                    web::get().to(oauth_login::callback),
                )
                .route(
                    "/{provider}/callback",
                    web::post().to(oauth_login::callback),
                )
                .route("/{provider}", web::get().to(oauth_login::start)),
        )
        // ─────────────────────────────────────────────────────────────────
        // Session management
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/api/sessions")
                .route("", web::get().to(sessions::list_sessions))
                .route("/revoke-all", web::post().to(sessions::revoke_all))
                .route(
                    "/device/{device_id}",
                    web::post().to(sessions::revoke_device),
                )
                .route("/{id}", web::delete().to(sessions::revoke_session)),
        )
        // ─────────────────────────────────────────────────────────────────
        // Public application config
        // ─────────────────────────────────────────────────────────────────
        .route(
            "/api/applications/{id}/auth-config",
            web::get().to(admin::auth_config),
        )
        // ─────────────────────────────────────────────────────────────────
        // Admin
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/api/admin")
                .route("/applications", web::post().to(admin::create_application))
                .route("/applications", web::get().to(admin::list_applications))
                .route(
                    "/applications/{id}/rotate-secret",
                    web::post().to(admin::rotate_application_secret),
                )
                .route(
                    "/applications/{id}",
                    web::delete().to(admin::delete_application),
                )
                .route("/api-keys", web::post().to(admin::create_api_key))
                .route("/api-keys", web::get().to(admin::list_api_keys))
                .route("/api-keys/{id}", web::delete().to(admin::revoke_api_key))
                .route("/webhooks", web::post().to(admin::create_webhook))
                .route("/webhooks/{id}/stats", web::get().to(admin::webhook_stats))
                .route("/webhooks/{id}", web::delete().to(admin::delete_webhook))
                .route("/ip-filters", web::post().to(admin::create_ip_filter))
                .route("/ip-filters/{id}", web::delete().to(admin::delete_ip_filter))
                .route("/users/{id}/ban", web::post().to(admin::ban_user))
                .route("/users/{id}/unban", web::post().to(admin::unban_user))
                .route(
                    "/users/{id}/deactivate",
                    web::post().to(admin::deactivate_user),
                )
                .route("/users/{id}", web::delete().to(admin::delete_user))
                .route("/users/{id}/roles", web::post().to(admin::assign_role))
                .route("/users/{id}/roles", web::delete().to(admin::revoke_role))
                .route("/users/{id}/audit", web::get().to(admin::user_audit))
                .route(
                    "/users/{id}/profile-roles",
                    web::put().to(admin::set_profile_roles),
                )
                .route("/roles", web::post().to(admin::create_role))
                .route("/permissions", web::post().to(admin::create_permission))
                .route(
                    "/oauth-clients",
                    web::post().to(admin::create_oauth_client),
                )
                .route(
                    "/saml/service-providers",
                    web::post().to(admin::create_saml_sp),
                )
                .route(
                    "/saml/service-providers",
                    web::get().to(admin::list_saml_sps),
                )
                .route("/keys", web::get().to(admin::list_keys))
                .route("/keys/rotate", web::post().to(admin::rotate_key))
                .route("/keys/{kid}", web::delete().to(admin::remove_key)),
        )
        // ─────────────────────────────────────────────────────────────────
        // OAuth provider
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/oauth")
                .route("/authorize", web::get().to(oidc::authorize))
                .route("/consent", web::post().to(oidc::consent))
                .route("/token", web::post().to(oidc::token))
                .route("/introspect", web::post().to(oidc::introspect))
                .route("/revoke", web::post().to(oidc::revoke))
                .route("/userinfo", web::get().to(oidc::userinfo))
                .route("/device", web::post().to(oidc::device_authorize))
                .route("/device/resolve", web::post().to(oidc::device_resolve)),
        )
        // ─────────────────────────────────────────────────────────────────
        // SAML
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/saml")
                .route("/metadata", web::get().to(saml::metadata))
                .route("/sso", web::post().to(saml::sso))
                .route("/slo", web::post().to(saml::slo)),
        )
        // ─────────────────────────────────────────────────────────────────
        // SCIM 2.0
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/scim/v2")
                .route(
                    "/ServiceProviderConfig",
                    web::get().to(scim::service_provider_config),
                )
                .route("/Users", web::get().to(scim::list_users))
                .route("/Users/{id}", web::get().to(scim::get_user))
                .route("/Groups", web::get().to(scim::list_groups)),
        );
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    // Route wiring is exercised by the integration layer; what matters
    // here is that the literal auth paths shadow the provider catch-all,
    // which is a property of registration order above.
}
