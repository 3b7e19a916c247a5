//! # Cryptographic Key Management
//!
//! Asymmetric signing keys for the token engine and the SAML IdP.
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`KeyManager`] | Keypair set, rotation, JWKS publication |
//! | [`SigningKey`] | One keypair: kid, algorithm, JWT keys, raw signer |
//! | [`Jwk`] / [`JwkSet`] | Public key material served at `/.well-known/jwks.json` |
//!
//! See [`keys`] for the full contract.

pub mod keys;

pub use keys::{Jwk, JwkSet, KeyAlgorithm, KeyError, KeyManager, SigningKey};
