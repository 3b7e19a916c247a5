//! # Data Transfer Objects
//!
//! The REST API contract: request validation via the `validator` crate,
//! responses as plain serde structs. Field names are snake_case on the
//! wire throughout the `/api` surface; the `/oauth` endpoints follow
//! their RFC field names.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{SessionView, UserView};
use shared::auth::jwt::TokenPair;

// =============================================================================
// AUTH FLOWS
// =============================================================================

/// `POST /api/auth/signup`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email(message = "Invalid email format"))]
    #[validate(length(max = 255, message = "Email too long"))]
    pub email: String,

    #[validate(length(min = 1, max = 128, message = "Password is required"))]
    pub password: String,

    #[validate(length(min = 3, max = 64, message = "Username must be 3-64 characters"))]
    pub username: Option<String>,

    pub application_id: Uuid,
}

/// `POST /api/auth/signin`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SigninRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    pub application_id: Uuid,
}

/// `POST /api/auth/refresh`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// `POST /api/auth/logout`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// `POST /api/auth/2fa/verify`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TwoFactorVerifyRequest {
    #[validate(length(min = 1, message = "Step-up token is required"))]
    pub step_up_token: String,

    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

// =============================================================================
// OTP FLOWS
// =============================================================================

/// `POST /api/auth/otp/send`, `POST /api/auth/otp/login`
///
/// Exactly one of email/phone.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OtpSendRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(custom(function = "shared::validation::validators::valid_e164"))]
    pub phone: Option<String>,

    pub application_id: Uuid,
}

/// `POST /api/auth/otp/verify`, `POST /api/auth/otp/login/verify`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OtpVerifyRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(custom(function = "shared::validation::validators::valid_e164"))]
    pub phone: Option<String>,

    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    pub code: String,

    pub application_id: Uuid,
}

/// `POST /api/auth/passwordless/init`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordlessInitRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub application_id: Uuid,
}

/// `POST /api/auth/passwordless/complete`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordlessCompleteRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    pub code: String,

    #[validate(length(min = 3, max = 64, message = "Username must be 3-64 characters"))]
    pub username: Option<String>,

    #[validate(length(max = 128, message = "Display name too long"))]
    pub display_name: Option<String>,

    pub application_id: Uuid,
}

// =============================================================================
// PASSWORD MANAGEMENT
// =============================================================================

/// `POST /api/auth/password/forgot`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub application_id: Uuid,
}

/// `POST /api/auth/password/reset`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    pub code: String,

    #[validate(length(min = 1, max = 128, message = "Password is required"))]
    pub new_password: String,
}

/// `POST /api/auth/password/change`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 1, max = 128, message = "New password is required"))]
    pub new_password: String,
}

// =============================================================================
// TOTP MANAGEMENT
// =============================================================================

/// `POST /api/auth/2fa/enable/confirm`, `POST /api/auth/2fa/disable`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TotpCodeRequest {
    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

/// Response for `POST /api/auth/2fa/enable`
#[derive(Debug, Clone, Serialize)]
pub struct TotpEnrollResponse {
    pub secret: String,
    pub provisioning_uri: String,
}

// =============================================================================
// TOKEN EXCHANGE
// =============================================================================

/// `POST /api/auth/token/exchange`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TokenExchangeRequest {
    #[validate(length(min = 1, message = "Access token is required"))]
    pub access_token: String,

    pub target_application_id: Uuid,
}

/// Response for `POST /api/auth/token/exchange`
#[derive(Debug, Clone, Serialize)]
pub struct TokenExchangeResponse {
    pub exchange_code: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// `POST /api/auth/token/exchange/redeem`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TokenExchangeRedeemRequest {
    #[validate(length(min = 1, message = "Exchange code is required"))]
    pub exchange_code: String,
}

// =============================================================================
// SHARED RESPONSES
// =============================================================================

/// Token response for all completed authentication flows.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponseDto {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
    pub user: UserView,
}

impl AuthResponseDto {
    pub fn new(tokens: TokenPair, user: UserView) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: tokens.expires_in,
            refresh_expires_in: tokens.refresh_expires_in,
            user,
        }
    }
}

/// Password flow response when a 2FA leg is still pending.
#[derive(Debug, Clone, Serialize)]
pub struct StepUpResponseDto {
    pub requires_two_factor: bool,
    pub step_up_token: String,
}

/// Token-pair-only response (refresh endpoint).
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponseDto {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

impl From<TokenPair> for TokenResponseDto {
    fn from(tokens: TokenPair) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: tokens.expires_in,
            refresh_expires_in: tokens.refresh_expires_in,
        }
    }
}

/// Generic message response.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// OTP send acknowledgment.
#[derive(Debug, Clone, Serialize)]
pub struct OtpSentResponse {
    pub sent: bool,
    pub expires_in: u64,
}

/// Session list response.
#[derive(Debug, Clone, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionView>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
}

// =============================================================================
// ADMIN
// =============================================================================

/// `POST /api/admin/applications`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApplicationRequest {
    #[validate(custom(function = "shared::validation::validators::valid_slug"))]
    #[validate(length(min = 2, max = 64, message = "Name must be 2-64 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 128, message = "Display name is required"))]
    pub display_name: String,

    pub allowed_auth_methods: Vec<String>,

    #[serde(default)]
    pub allowed_grpc_scopes: Vec<String>,

    #[serde(default)]
    pub callback_urls: Vec<String>,

    #[validate(url(message = "Invalid homepage URL"))]
    pub homepage_url: Option<String>,
}

/// Response carrying the one-time plaintext secret.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationCreatedResponse {
    pub application: crate::domain::Application,
    /// Shown exactly once; only the hash is stored
    pub secret: String,
}

/// `POST /api/admin/api-keys`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 128, message = "Name is required"))]
    pub name: String,

    #[validate(length(min = 1, message = "At least one scope is required"))]
    pub scopes: Vec<String>,

    pub application_id: Option<Uuid>,

    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Response carrying the one-time plaintext API key.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyCreatedResponse {
    pub api_key: crate::domain::ApiKey,
    /// Shown exactly once
    pub key: String,
}

/// `POST /api/admin/webhooks`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateWebhookRequest {
    pub application_id: Uuid,

    #[validate(url(message = "Invalid webhook URL"))]
    pub url: String,

    #[serde(default)]
    pub events: Vec<String>,
}

/// Response carrying the one-time webhook signing secret.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookCreatedResponse {
    pub webhook_id: Uuid,
    pub secret: String,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate as _;

    #[test]
    fn test_signin_request_validation() {
        let ok = SigninRequest {
            email: "u@x.com".into(),
            password: "P@ssw0rd!".into(),
            application_id: Uuid::new_v4(),
        };
        assert!(ok.validate().is_ok());

        let bad_email = SigninRequest {
            email: "not-an-email".into(),
            ..ok.clone()
        };
        assert!(bad_email.validate().is_err());

        let empty_password = SigninRequest {
            password: String::new(),
            ..ok
        };
        assert!(empty_password.validate().is_err());
    }

    #[test]
    fn test_otp_verify_code_length() {
        let base = OtpVerifyRequest {
            email: Some("u@x.com".into()),
            phone: None,
            code: "123456".into(),
            application_id: Uuid::new_v4(),
        };
        assert!(base.validate().is_ok());

        let short = OtpVerifyRequest {
            code: "123".into(),
            ..base
        };
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_otp_send_accepts_e164_phone() {
        let req = OtpSendRequest {
            email: None,
            phone: Some("+12025550123".into()),
            application_id: Uuid::new_v4(),
        };
        assert!(req.validate().is_ok());

        let bad = OtpSendRequest {
            phone: Some("555-0123".into()),
            ..req
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_application_name_must_be_slug() {
        let req = CreateApplicationRequest {
            name: "My App".into(),
            display_name: "My App".into(),
            allowed_auth_methods: vec!["password".into()],
            allowed_grpc_scopes: vec![],
            callback_urls: vec![],
            homepage_url: None,
        };
        assert!(req.validate().is_err());

        let ok = CreateApplicationRequest {
            name: "my-app".into(),
            ..req
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_auth_response_shape() {
        let tokens = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: 900,
            refresh_expires_in: 604800,
        };
        let dto = TokenResponseDto::from(tokens);
        assert_eq!(dto.token_type, "Bearer");

        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["access_token"], "a");
        assert_eq!(json["expires_in"], 900);
    }
}
