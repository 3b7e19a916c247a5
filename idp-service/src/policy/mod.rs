//! # Policy Gate
//!
//! The per-request pipeline that runs before any orchestrator logic.
//! Failures here surface directly and never reach the services.
//!
//! ```text
//! 1. resolve exactly one credential (agw_ key | app_ secret | Bearer JWT)
//! 2. verify it (signature+blacklist+session / hash+active+expiry)
//! 3. resolve the effective application and cross-check the stated one
//! 4. allowed_auth_methods / allowed_grpc_scopes
//! 5. IP filters (blacklist, then whitelist-if-any)
//! 6. rate limits
//! ```

pub mod gate;

pub use gate::{Caller, PolicyGate, RequestContext};
