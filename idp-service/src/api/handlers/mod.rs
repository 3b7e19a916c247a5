//! # Request Handlers
//!
//! One module per endpoint family; all follow the same pattern:
//! validate, extract context, run the policy gate, call the service,
//! shape the response.

pub mod admin;
pub mod auth;
pub mod oauth_login;
pub mod oidc;
pub mod saml;
pub mod scim;
pub mod sessions;
