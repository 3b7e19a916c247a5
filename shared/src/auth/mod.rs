//! # Authentication Building Blocks
//!
//! The credential primitives every flow is assembled from.
//!
//! ## Module Structure
//!
//! ```text
//! auth/
//! ├── jwt.rs      - token engine: JWT shapes, opaque tokens, verification
//! ├── password.rs - Argon2id hashing, tenant password policy, TOTP
//! └── api_key.rs  - agw_/app_ credentials and the closed scope set
//! ```
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`TokenService`] | Issue and verify access/ID/step-up/opaque tokens |
//! | [`PasswordHasher`] | Argon2id hashing with lazy rehash |
//! | [`PasswordPolicy`] | Tenant-configurable strength/rotation/history rules |
//! | [`api_key`] | Server-to-server credential generation + [`ApiScope`] |
//!
//! The request-time policy gate that strings these together lives in the
//! IdP service crate; this module is transport-agnostic.

pub mod api_key;
pub mod jwt;
pub mod password;

// Re-export main types for convenient access
pub use api_key::ApiScope;
pub use jwt::{AccessClaims, TokenPair, TokenService, TokenSubject};
pub use password::{PasswordHasher, PasswordPolicy};
