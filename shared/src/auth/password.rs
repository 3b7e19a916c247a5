//! # Password Hashing and Policy
//!
//! Secure password storage using the Argon2id algorithm, plus the
//! tenant-configurable password policy.
//!
//! ## Why Argon2id?
//!
//! Argon2 won the Password Hashing Competition and is recommended by
//! OWASP; the `id` variant resists both GPU and side-channel attacks.
//!
//! ## Security Parameters (OWASP Recommended)
//!
//! | Parameter | Default | Purpose |
//! |-----------|---------|---------|
//! | Memory | 64 MiB | Makes attacks expensive (GPU memory) |
//! | Iterations | 3 | Time cost (slows brute force) |
//! | Parallelism | 4 | CPU lanes |
//!
//! The memory cost is configurable; stored hashes embed their own
//! parameters (PHC string format), which is what makes **lazy rehash**
//! possible: [`PasswordHasher::needs_rehash`] compares a stored hash's
//! parameters against current policy, and the login path re-hashes on
//! success when the stored hash is weaker.
//!
//! ## PHC String Format
//!
//! ```text
//! $argon2id$v=19$m=65536,t=3,p=4$<salt>$<hash>
//! ```
//!
//! ## Password Policy
//!
//! [`PasswordPolicy`] is tenant-configurable: length, character classes,
//! rotation interval and history depth (reject reuse of the last N
//! hashes). History checking happens in the credential store, which holds
//! the previous hashes; the policy only decides.

use crate::errors::ApiError;
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Password Hasher
// =============================================================================

/// Secure password hashing service using Argon2id.
///
/// ## Thread Safety
///
/// This type is `Clone` and `Send + Sync`, safe for concurrent use.
/// Each hash operation generates a new random salt.
#[derive(Clone)]
pub struct PasswordHasher {
    /// Pre-configured Argon2 instance
    argon2: Argon2<'static>,
    /// Current memory cost, for rehash comparison
    memory_kib: u32,
    /// Current time cost, for rehash comparison
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    /// Creates a hasher with OWASP-recommended parameters
    /// (64 MiB, 3 iterations, 4 lanes).
    pub fn new() -> Self {
        Self::with_cost(64 * 1024, 3)
    }

    /// Creates a hasher with a custom memory/time cost.
    ///
    /// Used by deployments that tune verification latency; also keeps
    /// tests fast.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> Self {
        let params = Params::new(memory_kib, iterations, 4, None).expect("Invalid Argon2 params");

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        Self {
            argon2,
            memory_kib,
            iterations,
        }
    }

    /// Hashes a password for secure storage.
    ///
    /// Returns a PHC-formatted string embedding algorithm, version,
    /// parameters, salt, and hash.
    pub fn hash(&self, password: &str) -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::InternalError {
                message: format!("Password hashing failed: {}", e),
            })
    }

    /// Verifies a password against a stored hash in constant time.
    ///
    /// ## Returns
    ///
    /// - `Ok(true)` - Password matches
    /// - `Ok(false)` - Password doesn't match
    /// - `Err(...)` - Invalid hash format
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, ApiError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| ApiError::InternalError {
            message: format!("Invalid password hash format: {}", e),
        })?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(ApiError::InternalError {
                message: format!("Password verification failed: {}", e),
            }),
        }
    }

    /// Returns `true` when a stored hash uses a different algorithm or
    /// weaker parameters than current policy.
    ///
    /// The login path calls this after a successful verify and re-hashes
    /// with the current parameters; hashes we cannot parse also report
    /// `true` so legacy formats converge.
    pub fn needs_rehash(&self, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(_) => return true,
        };

        if parsed.algorithm.as_str() != "argon2id" {
            return true;
        }

        let params = match Params::try_from(&parsed) {
            Ok(p) => p,
            Err(_) => return true,
        };

        params.m_cost() < self.memory_kib || params.t_cost() < self.iterations
    }
}

// Implement Debug manually to avoid exposing internal state
impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}

// =============================================================================
// Password Policy
// =============================================================================

/// Tenant-configurable password policy.
///
/// | Field | Default | Meaning |
/// |-------|---------|---------|
/// | `min_length` | 10 | Minimum characters |
/// | `require_uppercase` etc. | true | Character class requirements |
/// | `rotation_days` | None | Password expiry interval |
/// | `history_depth` | 3 | Reject reuse of the last N hashes |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
    /// Days until a password expires; `None` disables rotation
    pub rotation_days: Option<u32>,
    /// How many previous hashes to check for reuse
    pub history_depth: u32,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 10,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_symbol: true,
            rotation_days: None,
            history_depth: 3,
        }
    }
}

impl PasswordPolicy {
    /// Validates a candidate password against this policy.
    ///
    /// ## Returns
    ///
    /// - `Ok(())` - Password meets all requirements
    /// - `Err(Vec<&str>)` - List of failed requirements
    pub fn validate(&self, password: &str) -> Result<(), Vec<&'static str>> {
        let mut errors = Vec::new();

        if password.chars().count() < self.min_length {
            errors.push("Password is too short");
        }

        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            errors.push("Password must contain at least one uppercase letter");
        }

        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            errors.push("Password must contain at least one lowercase letter");
        }

        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push("Password must contain at least one digit");
        }

        if self.require_symbol && !password.chars().any(|c| "!@#$%^&*()-_=+[]{};:,.<>?".contains(c))
        {
            errors.push("Password must contain at least one special character");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// =============================================================================
// TOTP (RFC 6238)
// =============================================================================

/// Time-based one-time passwords for the 2FA step-up leg.
///
/// 30-second steps, 6 digits, HMAC-SHA1 per RFC 6238. Verification
/// accepts ±1 step of clock skew.
pub mod totp {
    use data_encoding::BASE32_NOPAD;
    use hmac::{Hmac, Mac};
    use sha1::Sha1;

    /// Step size in seconds.
    const STEP_SECONDS: u64 = 30;
    /// Code length in digits.
    const DIGITS: u32 = 6;

    /// Generates a new base32-encoded 160-bit secret for enrollment.
    pub fn generate_secret() -> String {
        use rand::RngCore as _;
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        BASE32_NOPAD.encode(&bytes)
    }

    /// Builds the `otpauth://` provisioning URI authenticator apps scan.
    pub fn provisioning_uri(secret: &str, issuer: &str, account: &str) -> String {
        format!(
            "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={DIGITS}&period={STEP_SECONDS}"
        )
    }

    /// Computes the code for a specific counter value.
    fn code_at_counter(secret_bytes: &[u8], counter: u64) -> String {
        type HmacSha1 = Hmac<Sha1>;

        let mut mac =
            HmacSha1::new_from_slice(secret_bytes).expect("HMAC accepts any key length");
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        // Dynamic truncation per RFC 4226
        let offset = (digest[19] & 0x0f) as usize;
        let binary = ((u32::from(digest[offset]) & 0x7f) << 24)
            | (u32::from(digest[offset + 1]) << 16)
            | (u32::from(digest[offset + 2]) << 8)
            | u32::from(digest[offset + 3]);

        format!("{:06}", binary % 10u32.pow(DIGITS))
    }

    /// Computes the code for a Unix timestamp.
    pub fn code_at(secret: &str, unix_seconds: u64) -> Option<String> {
        let secret_bytes = BASE32_NOPAD.decode(secret.as_bytes()).ok()?;
        Some(code_at_counter(&secret_bytes, unix_seconds / STEP_SECONDS))
    }

    /// Verifies a code at a Unix timestamp, accepting ±1 step of skew.
    pub fn verify_at(secret: &str, code: &str, unix_seconds: u64) -> bool {
        let secret_bytes = match BASE32_NOPAD.decode(secret.as_bytes()) {
            Ok(b) => b,
            Err(_) => return false,
        };

        let counter = unix_seconds / STEP_SECONDS;
        for candidate in counter.saturating_sub(1)..=counter + 1 {
            if code_at_counter(&secret_bytes, candidate) == code {
                return true;
            }
        }
        false
    }

    /// Verifies a code against the current wall clock.
    pub fn verify_now(secret: &str, code: &str) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        verify_at(secret, code, now)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Low-cost hasher keeps the test suite fast
    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::with_cost(8 * 1024, 1)
    }

    #[test]
    fn test_hash_and_verify_correct_password() {
        let hasher = fast_hasher();
        let password = "MySecureP@ssw0rd!";

        let hash = hasher.hash(password).unwrap();

        assert_ne!(hash, password);
        assert!(hasher.verify(password, &hash).unwrap());
    }

    #[test]
    fn test_verify_wrong_password() {
        let hasher = fast_hasher();
        let hash = hasher.hash("MySecureP@ssw0rd!").unwrap();

        assert!(!hasher.verify("WrongP@ssw0rd!", &hash).unwrap());
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let hasher = fast_hasher();
        let password = "MySecureP@ssw0rd!";

        let hash1 = hasher.hash(password).unwrap();
        let hash2 = hasher.hash(password).unwrap();

        // Each hash is unique due to random salt
        assert_ne!(hash1, hash2);
        assert!(hasher.verify(password, &hash1).unwrap());
        assert!(hasher.verify(password, &hash2).unwrap());
    }

    #[test]
    fn test_hash_is_phc_format() {
        let hash = fast_hasher().hash("TestP@ssw0rd!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_needs_rehash_on_weaker_params() {
        let weak = PasswordHasher::with_cost(8 * 1024, 1);
        let strong = PasswordHasher::with_cost(16 * 1024, 2);

        let weak_hash = weak.hash("TestP@ssw0rd!").unwrap();

        // A hash from the weak hasher is below the strong hasher's policy
        assert!(strong.needs_rehash(&weak_hash));
        // But matches its own
        assert!(!weak.needs_rehash(&weak_hash));
    }

    #[test]
    fn test_needs_rehash_on_garbage() {
        assert!(fast_hasher().needs_rehash("not-a-phc-string"));
    }

    #[test]
    fn test_policy_default_accepts_strong_password() {
        let policy = PasswordPolicy::default();
        assert!(policy.validate("MyP@ssw0rd!x").is_ok());
    }

    #[test]
    fn test_policy_rejects_weak_passwords() {
        let policy = PasswordPolicy::default();

        assert!(policy.validate("Short1!").is_err()); // too short
        assert!(policy.validate("myp@ssw0rdlong").is_err()); // no uppercase
        assert!(policy.validate("MYP@SSW0RDLONG").is_err()); // no lowercase
        assert!(policy.validate("MyP@sswordlong").is_err()); // no digit
        assert!(policy.validate("MyPassw0rdlong").is_err()); // no symbol
    }

    #[test]
    fn test_policy_relaxed_tenant() {
        let policy = PasswordPolicy {
            min_length: 8,
            require_uppercase: false,
            require_symbol: false,
            ..PasswordPolicy::default()
        };

        assert!(policy.validate("simple1pass").is_ok());
    }

    #[test]
    fn test_totp_rfc6238_vector() {
        // RFC 6238 test secret "12345678901234567890" (SHA-1), T=59s
        let secret = data_encoding::BASE32_NOPAD.encode(b"12345678901234567890");
        let code = totp::code_at(&secret, 59).unwrap();
        // RFC appendix B lists 94287082 for 8 digits; last 6 are 287082
        assert_eq!(code, "287082");
    }

    #[test]
    fn test_totp_verify_with_skew() {
        let secret = totp::generate_secret();
        let now = 1_700_000_000u64;
        let code = totp::code_at(&secret, now).unwrap();

        // Exact, one step early, one step late
        assert!(totp::verify_at(&secret, &code, now));
        assert!(totp::verify_at(&secret, &code, now + 30));
        assert!(totp::verify_at(&secret, &code, now - 30));
        // Two steps away fails
        assert!(!totp::verify_at(&secret, &code, now + 90));
    }

    #[test]
    fn test_totp_rejects_wrong_code() {
        let secret = totp::generate_secret();
        assert!(!totp::verify_at(&secret, "000000", 1_700_000_000));
    }

    #[test]
    fn test_provisioning_uri_shape() {
        let uri = totp::provisioning_uri("SECRETBASE32", "auth-gateway", "u@x.com");
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("secret=SECRETBASE32"));
        assert!(uri.contains("issuer=auth-gateway"));
    }
}
