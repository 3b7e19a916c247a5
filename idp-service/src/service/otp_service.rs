//! # OTP Issuance and Verification
//!
//! The credential store's one-time-code half: CSPRNG codes, bcrypt
//! at-rest hashing, single-shot consumption and layered send limits.
//!
//! ## Send Limits
//!
//! | Counter | Default |
//! |---------|---------|
//! | per recipient per hour | 5 |
//! | per (recipient, type) per hour | 3 |
//! | global per hour | 1000 |
//! | global per day | 10000 |
//!
//! All four are atomic sliding-window counters in Redis; exceeding any
//! returns `RateLimited` with a retry hint.
//!
//! ## Verification Outcomes
//!
//! | State | Error |
//! |-------|-------|
//! | no code issued | `InvalidCredentials` |
//! | already consumed | `OtpConsumed` |
//! | past TTL | `OtpExpired` |
//! | wrong code | `InvalidCredentials` (counts toward lockout) |
//! | race lost on consume | `OtpConsumed` |

use shared::config::OtpConfig;
use shared::errors::ApiError;
use shared::redis_client::RedisClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::domain::OtpType;
use crate::repository::OtpRepository;
use crate::service::notifier::{EmailSender, SmsSender};

/// Cost for at-rest code hashes. Codes live minutes and are 6 digits;
/// a moderate cost keeps verification snappy under load.
const OTP_BCRYPT_COST: u32 = 8;

/// Where a code is delivered. Email xor phone, enforced by type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpTarget {
    Email(String),
    Phone(String),
}

impl OtpTarget {
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Email(e) => Some(e),
            Self::Phone(_) => None,
        }
    }

    pub fn phone(&self) -> Option<&str> {
        match self {
            Self::Email(_) => None,
            Self::Phone(p) => Some(p),
        }
    }

    /// Rate-limit key fragment.
    fn key(&self) -> &str {
        match self {
            Self::Email(e) => e,
            Self::Phone(p) => p,
        }
    }
}

/// Service for OTP operations.
pub struct OtpService {
    otps: OtpRepository,
    redis: RedisClient,
    email: Arc<dyn EmailSender>,
    sms: Arc<dyn SmsSender>,
    config: OtpConfig,
}

impl OtpService {
    pub fn new(
        otps: OtpRepository,
        redis: RedisClient,
        email: Arc<dyn EmailSender>,
        sms: Arc<dyn SmsSender>,
        config: OtpConfig,
    ) -> Self {
        Self {
            otps,
            redis,
            email,
            sms,
            config,
        }
    }

    /// Generates a 6-digit code with the CSPRNG.
    fn generate_code() -> String {
        use rand::Rng as _;
        format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
    }

    /// TTL by purpose: 5 min for login/2FA, 10 min for
    /// registration/verification/reset.
    fn ttl_for(&self, otp_type: OtpType) -> u64 {
        match otp_type {
            OtpType::Login | OtpType::TwoFactor => self.config.login_ttl_seconds,
            OtpType::Registration | OtpType::Verification | OtpType::PasswordReset => {
                self.config.registration_ttl_seconds
            }
        }
    }

    // =========================================================================
    // SEND
    // =========================================================================

    /// Issues and delivers a code after passing all four send limits.
    ///
    /// Returns the code TTL in seconds. The code itself is never
    /// returned or logged.
    pub async fn send(
        &self,
        target: &OtpTarget,
        otp_type: OtpType,
        app_display_name: &str,
    ) -> Result<u64, ApiError> {
        self.enforce_send_limits(target, otp_type).await?;

        let code = Self::generate_code();
        let code_hash = bcrypt::hash(&code, OTP_BCRYPT_COST).map_err(|e| {
            ApiError::InternalError {
                message: format!("OTP hashing failed: {e}"),
            }
        })?;

        let ttl = self.ttl_for(otp_type);
        self.otps
            .issue(
                target.email(),
                target.phone(),
                &code_hash,
                otp_type.as_str(),
                ttl,
            )
            .await?;

        match target {
            OtpTarget::Email(address) => {
                let subject = format!("{app_display_name}: your verification code");
                let body = format!(
                    "<p>Your code is <strong>{code}</strong>. It expires in {} minutes.</p>\
                     <p>If you did not request this, you can ignore this message.</p>",
                    ttl / 60
                );
                self.email.send_email(address, &subject, &body).await?;
            }
            OtpTarget::Phone(number) => {
                let body = format!("{app_display_name} code: {code}");
                self.sms.send_sms(number, &body).await?;
            }
        }

        info!(otp_type = otp_type.as_str(), "OTP issued");

        Ok(ttl)
    }

    async fn enforce_send_limits(
        &self,
        target: &OtpTarget,
        otp_type: OtpType,
    ) -> Result<(), ApiError> {
        let hour = Duration::from_secs(3600);
        let day = Duration::from_secs(86400);
        let recipient = target.key();

        let checks: [(String, Duration, u32); 4] = [
            (
                format!("rl:otp:recipient:{recipient}"),
                hour,
                self.config.per_recipient_per_hour,
            ),
            (
                format!("rl:otp:recipient:{recipient}:{}", otp_type.as_str()),
                hour,
                self.config.per_recipient_per_type_per_hour,
            ),
            ("rl:otp:global:hour".to_string(), hour, self.config.global_per_hour),
            ("rl:otp:global:day".to_string(), day, self.config.global_per_day),
        ];

        for (key, window, limit) in checks {
            let count = self.redis.incr_window(&key, window).await?;
            if count > limit as i64 {
                let retry = self.redis.ttl_seconds(&key).await?.unwrap_or(window.as_secs());
                return Err(ApiError::RateLimited {
                    retry_after_seconds: retry,
                });
            }
        }

        Ok(())
    }

    // =========================================================================
    // VERIFY
    // =========================================================================

    /// Verifies and consumes a code atomically.
    ///
    /// The caller is responsible for feeding a mismatch into the lockout
    /// counter; this service only reports it.
    pub async fn verify(
        &self,
        target: &OtpTarget,
        otp_type: OtpType,
        code: &str,
    ) -> Result<(), ApiError> {
        let otp = self
            .otps
            .find_latest(target.email(), target.phone(), otp_type.as_str())
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        if otp.used {
            return Err(ApiError::OtpConsumed);
        }

        if otp.expires_at <= chrono::Utc::now() {
            return Err(ApiError::OtpExpired);
        }

        let matches = bcrypt::verify(code, &otp.code_hash).map_err(|e| ApiError::InternalError {
            message: format!("OTP verification failed: {e}"),
        })?;

        if !matches {
            return Err(ApiError::InvalidCredentials);
        }

        // Single-shot: losing this race means someone else already
        // redeemed the same code
        if !self.otps.consume(otp.id).await? {
            return Err(ApiError::OtpConsumed);
        }

        Ok(())
    }
}

impl std::fmt::Debug for OtpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpService").finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_is_six_digits() {
        for _ in 0..100 {
            let code = OtpService::generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_code_hash_verifies() {
        let code = OtpService::generate_code();
        let hash = bcrypt::hash(&code, OTP_BCRYPT_COST).unwrap();

        assert!(bcrypt::verify(&code, &hash).unwrap());
        assert!(!bcrypt::verify("000000", &hash).unwrap() || code == "000000");
    }

    #[test]
    fn test_target_exclusivity() {
        let email = OtpTarget::Email("u@x.com".into());
        assert_eq!(email.email(), Some("u@x.com"));
        assert_eq!(email.phone(), None);

        let phone = OtpTarget::Phone("+12025550123".into());
        assert_eq!(phone.email(), None);
        assert_eq!(phone.phone(), Some("+12025550123"));
    }
}
