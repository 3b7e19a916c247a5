//! # Signing Key Manager
//!
//! Maintains the set of asymmetric keypairs used to sign and verify every
//! JWT and SAML assertion the IdP produces.
//!
//! ## Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         KeyManager                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  RwLock<Arc<KeySet>>     reads clone the Arc (cheap, lock-free  │
//! │        │                 after the snapshot), rotations build   │
//! │        ▼                 a new KeySet and swap the pointer      │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐                      │
//! │  │ kid=K1    │ │ kid=K2 ★  │ │ kid=K3    │   ★ = current        │
//! │  │ RS256     │ │ RS256     │ │ ES256     │                      │
//! │  └───────────┘ └───────────┘ └───────────┘                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one key is *current* and signs new tokens; every loaded key
//! verifies until removed. Rotation: add new key, promote it, retain the
//! previous key for at least the longest refresh-token TTL, then remove.
//!
//! ## Supported Algorithms
//!
//! | Algorithm | Keypair | JWKS fields |
//! |-----------|---------|-------------|
//! | RS256 | RSA-2048 | `kty=RSA`, `n`, `e` |
//! | ES256 | P-256 | `kty=EC`, `crv=P-256`, `x`, `y` |
//!
//! ## Failure Modes
//!
//! [`KeyError::KeyLoad`] (bad PEM / generation failure),
//! [`KeyError::UnknownKid`] (verify with a kid not in the set),
//! [`KeyError::VerifyMismatch`] (signature check failed).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{DecodingKey, EncodingKey};
use p256::ecdsa::signature::SignatureEncoding as _;
use p256::ecdsa::signature::Signer as _;
use p256::elliptic_curve::sec1::ToEncodedPoint as _;
use p256::pkcs8::{EncodePrivateKey as _, LineEnding};
use rsa::pkcs8::EncodePrivateKey as _;
use rsa::traits::PublicKeyParts as _;
use rsa::Pkcs1v15Sign;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::errors::ApiError;

// =============================================================================
// Errors
// =============================================================================

/// Key-management failure modes.
#[derive(Debug, Error)]
pub enum KeyError {
    /// PEM parse or key generation failed.
    #[error("failed to load signing key: {0}")]
    KeyLoad(String),

    /// A token or assertion referenced a kid that is not loaded.
    #[error("unknown key id: {0}")]
    UnknownKid(String),

    /// Signature verification failed against the named key.
    #[error("signature verification mismatch")]
    VerifyMismatch,
}

impl From<KeyError> for ApiError {
    fn from(e: KeyError) -> Self {
        match e {
            // An unknown kid or bad signature on an inbound token is the
            // caller's problem, not ours
            KeyError::UnknownKid(_) | KeyError::VerifyMismatch => ApiError::TokenInvalid,
            KeyError::KeyLoad(msg) => ApiError::InternalError { message: msg },
        }
    }
}

// =============================================================================
// Algorithm
// =============================================================================

/// Signing algorithms the manager supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// RSA-SHA256 (RSA-2048 keypair)
    Rs256,
    /// ECDSA P-256 SHA-256
    Es256,
}

impl KeyAlgorithm {
    /// The `alg` value used in JWT headers and JWKS entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Es256 => "ES256",
        }
    }

    /// Maps to the jsonwebtoken algorithm enum.
    pub fn jwt_algorithm(&self) -> jsonwebtoken::Algorithm {
        match self {
            Self::Rs256 => jsonwebtoken::Algorithm::RS256,
            Self::Es256 => jsonwebtoken::Algorithm::ES256,
        }
    }

    /// Parses a configured algorithm name.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        match s {
            "RS256" => Ok(Self::Rs256),
            "ES256" => Ok(Self::Es256),
            other => Err(KeyError::KeyLoad(format!("unsupported algorithm: {other}"))),
        }
    }
}

// =============================================================================
// JWKS Types
// =============================================================================

/// One public key as served in the JWKS document.
///
/// RSA keys carry `n`/`e`; EC keys carry `crv`/`x`/`y`. All binary fields
/// are base64url without padding per RFC 7517.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Jwk {
    /// Key type: `RSA` or `EC`
    pub kty: String,
    /// Always `sig` - these keys never encrypt
    #[serde(rename = "use")]
    pub use_: String,
    /// Algorithm: `RS256` or `ES256`
    pub alg: String,
    /// Key identifier, echoed in JWT headers
    pub kid: String,
    /// RSA modulus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve name (`P-256`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// The JWKS document: current signing key plus every key still accepted
/// for verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

// =============================================================================
// Signing Key
// =============================================================================

/// Raw private key material, retained for non-JWT signatures (SAML XML-DSig).
enum PrivateKey {
    Rsa(rsa::RsaPrivateKey),
    P256(p256::SecretKey),
}

/// One keypair in the manager's set.
///
/// Holds the jsonwebtoken encoding/decoding keys, the public JWK and the
/// raw private key for detached signatures.
pub struct SigningKey {
    /// Key identifier; appears in JWT headers and JWKS
    pub kid: String,
    /// Signing algorithm for this keypair
    pub algorithm: KeyAlgorithm,
    /// Public material for JWKS publication
    pub jwk: Jwk,
    /// PEM-encoded PKCS#8 private key (for persistence by the operator)
    pub private_pem: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    private_key: PrivateKey,
}

impl SigningKey {
    /// Generates a fresh RSA-2048 keypair.
    pub fn generate_rsa(kid: String) -> Result<Self, KeyError> {
        let mut rng = rand::rngs::OsRng;
        let private = rsa::RsaPrivateKey::new(&mut rng, 2048)
            .map_err(|e| KeyError::KeyLoad(e.to_string()))?;
        Self::from_rsa(kid, private)
    }

    /// Generates a fresh P-256 keypair.
    pub fn generate_p256(kid: String) -> Result<Self, KeyError> {
        let private = p256::SecretKey::random(&mut rand::rngs::OsRng);
        Self::from_p256(kid, private)
    }

    /// Loads a key from a PKCS#8 PEM string, detecting the key type.
    pub fn from_pem(kid: String, pem: &str) -> Result<Self, KeyError> {
        use p256::pkcs8::DecodePrivateKey as _;
        use rsa::pkcs8::DecodePrivateKey as _;

        if let Ok(private) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
            return Self::from_rsa(kid, private);
        }
        if let Ok(private) = p256::SecretKey::from_pkcs8_pem(pem) {
            return Self::from_p256(kid, private);
        }
        Err(KeyError::KeyLoad(format!(
            "key {kid}: not a PKCS#8 RSA or P-256 private key"
        )))
    }

    fn from_rsa(kid: String, private: rsa::RsaPrivateKey) -> Result<Self, KeyError> {
        let pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::KeyLoad(e.to_string()))?
            .to_string();

        let public = private.to_public_key();
        let jwk = Jwk {
            kty: "RSA".to_string(),
            use_: "sig".to_string(),
            alg: "RS256".to_string(),
            kid: kid.clone(),
            n: Some(URL_SAFE_NO_PAD.encode(public.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(public.e().to_bytes_be())),
            crv: None,
            x: None,
            y: None,
        };

        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| KeyError::KeyLoad(e.to_string()))?;
        let public_pem = {
            use rsa::pkcs8::EncodePublicKey as _;
            public
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| KeyError::KeyLoad(e.to_string()))?
        };
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| KeyError::KeyLoad(e.to_string()))?;

        Ok(Self {
            kid,
            algorithm: KeyAlgorithm::Rs256,
            jwk,
            private_pem: pem,
            encoding_key,
            decoding_key,
            private_key: PrivateKey::Rsa(private),
        })
    }

    fn from_p256(kid: String, private: p256::SecretKey) -> Result<Self, KeyError> {
        let pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::KeyLoad(e.to_string()))?
            .to_string();

        let public = private.public_key();
        let point = public.to_encoded_point(false);
        let (x, y) = match (point.x(), point.y()) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(KeyError::KeyLoad("P-256 point at infinity".to_string())),
        };

        let jwk = Jwk {
            kty: "EC".to_string(),
            use_: "sig".to_string(),
            alg: "ES256".to_string(),
            kid: kid.clone(),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: Some(URL_SAFE_NO_PAD.encode(x)),
            y: Some(URL_SAFE_NO_PAD.encode(y)),
        };

        let encoding_key = EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| KeyError::KeyLoad(e.to_string()))?;
        let public_pem = {
            use p256::pkcs8::EncodePublicKey as _;
            public
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| KeyError::KeyLoad(e.to_string()))?
        };
        let decoding_key = DecodingKey::from_ec_pem(public_pem.as_bytes())
            .map_err(|e| KeyError::KeyLoad(e.to_string()))?;

        Ok(Self {
            kid,
            algorithm: KeyAlgorithm::Es256,
            jwk,
            private_pem: pem,
            encoding_key,
            decoding_key,
            private_key: PrivateKey::P256(private),
        })
    }

    /// The jsonwebtoken encoding key (token signing).
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// The jsonwebtoken decoding key (token verification).
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Signs arbitrary bytes with this keypair.
    ///
    /// RSA keys produce a PKCS#1 v1.5 signature over the SHA-256 digest;
    /// EC keys produce a DER-encoded ECDSA signature. The SAML assertion
    /// builder is the only non-JWT consumer.
    pub fn sign_raw(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        match &self.private_key {
            PrivateKey::Rsa(key) => {
                let digest = Sha256::digest(data);
                key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| KeyError::KeyLoad(e.to_string()))
            }
            PrivateKey::P256(key) => {
                let signer = p256::ecdsa::SigningKey::from(key.clone());
                let signature: p256::ecdsa::Signature = signer.sign(data);
                Ok(signature.to_der().to_vec())
            }
        }
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print private material
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Key Manager
// =============================================================================

/// Immutable snapshot of the key set. Rotations replace the whole snapshot.
struct KeySet {
    keys: Vec<Arc<SigningKey>>,
    /// Index of the current signing key within `keys`
    current: usize,
}

/// The key manager: a values-only structure read under a lock.
///
/// Reads take the lock just long enough to clone an `Arc` to the snapshot;
/// rotations build a new snapshot and swap it in.
pub struct KeyManager {
    inner: RwLock<Arc<KeySet>>,
}

impl KeyManager {
    /// Creates a manager with a single generated key of `algorithm`,
    /// marked current.
    pub fn bootstrap(algorithm: KeyAlgorithm) -> Result<Self, KeyError> {
        let kid = Self::random_kid();
        let key = match algorithm {
            KeyAlgorithm::Rs256 => SigningKey::generate_rsa(kid)?,
            KeyAlgorithm::Es256 => SigningKey::generate_p256(kid)?,
        };
        Ok(Self::from_keys(vec![Arc::new(key)], 0))
    }

    /// Creates a manager from pre-loaded keys.
    ///
    /// `current_kid` selects the signing key; when empty, the first key
    /// signs.
    pub fn from_loaded(keys: Vec<SigningKey>, current_kid: &str) -> Result<Self, KeyError> {
        if keys.is_empty() {
            return Err(KeyError::KeyLoad("no signing keys loaded".to_string()));
        }

        let keys: Vec<Arc<SigningKey>> = keys.into_iter().map(Arc::new).collect();
        let current = if current_kid.is_empty() {
            0
        } else {
            keys.iter()
                .position(|k| k.kid == current_kid)
                .ok_or_else(|| KeyError::UnknownKid(current_kid.to_string()))?
        };

        Ok(Self::from_keys(keys, current))
    }

    fn from_keys(keys: Vec<Arc<SigningKey>>, current: usize) -> Self {
        Self {
            inner: RwLock::new(Arc::new(KeySet { keys, current })),
        }
    }

    fn snapshot(&self) -> Arc<KeySet> {
        self.inner.read().expect("key set lock poisoned").clone()
    }

    fn swap(&self, set: KeySet) {
        *self.inner.write().expect("key set lock poisoned") = Arc::new(set);
    }

    /// Generates a random 16-hex-char key id.
    pub fn random_kid() -> String {
        use rand::Rng as _;
        let bytes: [u8; 8] = rand::thread_rng().gen();
        hex::encode(bytes)
    }

    /// The key currently used for signing.
    pub fn current(&self) -> Arc<SigningKey> {
        let set = self.snapshot();
        set.keys[set.current].clone()
    }

    /// Looks up a key by kid (for verification).
    ///
    /// ## Errors
    ///
    /// `KeyError::UnknownKid` when the kid is not in the loaded set.
    pub fn by_kid(&self, kid: &str) -> Result<Arc<SigningKey>, KeyError> {
        self.snapshot()
            .keys
            .iter()
            .find(|k| k.kid == kid)
            .cloned()
            .ok_or_else(|| KeyError::UnknownKid(kid.to_string()))
    }

    /// Adds a key to the set without changing the current signer.
    ///
    /// The key immediately becomes valid for verification and appears in
    /// the JWKS.
    pub fn add(&self, key: SigningKey) {
        let set = self.snapshot();
        let mut keys = set.keys.clone();
        keys.push(Arc::new(key));
        self.swap(KeySet {
            keys,
            current: set.current,
        });
    }

    /// Generates a new key of `algorithm`, adds it, and marks it current.
    ///
    /// Returns the new kid. The previous key stays in the set and must be
    /// retained for at least the longest refresh-token TTL before removal.
    pub fn rotate(&self, algorithm: KeyAlgorithm) -> Result<String, KeyError> {
        let kid = Self::random_kid();
        let key = match algorithm {
            KeyAlgorithm::Rs256 => SigningKey::generate_rsa(kid.clone())?,
            KeyAlgorithm::Es256 => SigningKey::generate_p256(kid.clone())?,
        };

        let set = self.snapshot();
        let mut keys = set.keys.clone();
        keys.push(Arc::new(key));
        let current = keys.len() - 1;
        self.swap(KeySet { keys, current });

        Ok(kid)
    }

    /// Marks an already-loaded key as the current signer.
    pub fn promote(&self, kid: &str) -> Result<(), KeyError> {
        let set = self.snapshot();
        let current = set
            .keys
            .iter()
            .position(|k| k.kid == kid)
            .ok_or_else(|| KeyError::UnknownKid(kid.to_string()))?;
        self.swap(KeySet {
            keys: set.keys.clone(),
            current,
        });
        Ok(())
    }

    /// Removes a key from the set. Tokens signed with it stop verifying.
    ///
    /// ## Errors
    ///
    /// - `UnknownKid` if the kid is not loaded
    /// - `KeyLoad` if the kid is the current signer (promote another first)
    pub fn remove(&self, kid: &str) -> Result<(), KeyError> {
        let set = self.snapshot();
        let idx = set
            .keys
            .iter()
            .position(|k| k.kid == kid)
            .ok_or_else(|| KeyError::UnknownKid(kid.to_string()))?;

        if idx == set.current {
            return Err(KeyError::KeyLoad(
                "cannot remove the current signing key".to_string(),
            ));
        }

        let mut keys = set.keys.clone();
        keys.remove(idx);
        // Removal may shift the current index
        let current = if idx < set.current {
            set.current - 1
        } else {
            set.current
        };
        self.swap(KeySet { keys, current });
        Ok(())
    }

    /// All loaded kids, current first.
    pub fn kids(&self) -> Vec<String> {
        let set = self.snapshot();
        let mut kids: Vec<String> = Vec::with_capacity(set.keys.len());
        kids.push(set.keys[set.current].kid.clone());
        for (i, key) in set.keys.iter().enumerate() {
            if i != set.current {
                kids.push(key.kid.clone());
            }
        }
        kids
    }

    /// Builds the JWKS document: every loaded key's public material.
    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: self.snapshot().keys.iter().map(|k| k.jwk.clone()).collect(),
        }
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("kids", &self.kids())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_rs256_produces_rsa_jwk() {
        let manager = KeyManager::bootstrap(KeyAlgorithm::Rs256).unwrap();
        let jwks = manager.jwks();

        assert_eq!(jwks.keys.len(), 1);
        let jwk = &jwks.keys[0];
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.use_, "sig");
        assert_eq!(jwk.alg, "RS256");
        assert!(jwk.n.is_some());
        assert!(jwk.e.is_some());
        assert!(jwk.crv.is_none());
    }

    #[test]
    fn test_bootstrap_es256_produces_ec_jwk() {
        let manager = KeyManager::bootstrap(KeyAlgorithm::Es256).unwrap();
        let jwks = manager.jwks();
        let jwk = &jwks.keys[0];

        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.alg, "ES256");
        assert_eq!(jwk.crv.as_deref(), Some("P-256"));
        assert!(jwk.x.is_some());
        assert!(jwk.y.is_some());
    }

    #[test]
    fn test_rotation_keeps_old_key_verifiable() {
        let manager = KeyManager::bootstrap(KeyAlgorithm::Rs256).unwrap();
        let old_kid = manager.current().kid.clone();

        let new_kid = manager.rotate(KeyAlgorithm::Rs256).unwrap();

        // New key signs, old key still resolves for verification
        assert_eq!(manager.current().kid, new_kid);
        assert!(manager.by_kid(&old_kid).is_ok());

        // JWKS contains both
        let kids: Vec<String> = manager.jwks().keys.iter().map(|k| k.kid.clone()).collect();
        assert!(kids.contains(&old_kid));
        assert!(kids.contains(&new_kid));
    }

    #[test]
    fn test_remove_drops_verification() {
        let manager = KeyManager::bootstrap(KeyAlgorithm::Rs256).unwrap();
        let old_kid = manager.current().kid.clone();
        manager.rotate(KeyAlgorithm::Rs256).unwrap();

        manager.remove(&old_kid).unwrap();

        assert!(matches!(
            manager.by_kid(&old_kid),
            Err(KeyError::UnknownKid(_))
        ));
        assert_eq!(manager.jwks().keys.len(), 1);
    }

    #[test]
    fn test_cannot_remove_current_key() {
        let manager = KeyManager::bootstrap(KeyAlgorithm::Rs256).unwrap();
        let kid = manager.current().kid.clone();

        assert!(manager.remove(&kid).is_err());
    }

    #[test]
    fn test_promote_switches_signer() {
        let manager = KeyManager::bootstrap(KeyAlgorithm::Rs256).unwrap();
        let first = manager.current().kid.clone();
        let second = manager.rotate(KeyAlgorithm::Es256).unwrap();
        assert_eq!(manager.current().kid, second);

        manager.promote(&first).unwrap();
        assert_eq!(manager.current().kid, first);
    }

    #[test]
    fn test_pem_roundtrip() {
        let key = SigningKey::generate_rsa("roundtrip".to_string()).unwrap();
        let reloaded = SigningKey::from_pem("roundtrip".to_string(), &key.private_pem).unwrap();

        assert_eq!(reloaded.algorithm, KeyAlgorithm::Rs256);
        assert_eq!(reloaded.jwk.n, key.jwk.n);
    }

    #[test]
    fn test_unknown_kid() {
        let manager = KeyManager::bootstrap(KeyAlgorithm::Rs256).unwrap();
        assert!(matches!(
            manager.by_kid("nope"),
            Err(KeyError::UnknownKid(_))
        ));
    }

    #[test]
    fn test_raw_signature_nonempty_and_keyed() {
        let key = SigningKey::generate_rsa("raw".to_string()).unwrap();
        let sig = key.sign_raw(b"assertion bytes").unwrap();
        assert_eq!(sig.len(), 256); // RSA-2048 signature

        let ec = SigningKey::generate_p256("raw-ec".to_string()).unwrap();
        let sig = ec.sign_raw(b"assertion bytes").unwrap();
        assert!(!sig.is_empty());
    }
}
