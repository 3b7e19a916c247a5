//! # Application Error Types
//!
//! Unified error handling for the identity provider with automatic
//! conversion to both transports.
//!
//! ## Design Philosophy
//!
//! This module follows the "make illegal states unrepresentable" principle.
//! Each error variant maps to a specific HTTP status code, gRPC status code
//! and stable error code, ensuring consistent responses on both surfaces.
//!
//! ## Error Categories
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ApiError Categories                             │
//! ├─────────────────────────┬───────────────────┬────────────────────────────┤
//! │ Authentication (401)    │ Authorization(403)│ Validation (400)           │
//! ├─────────────────────────┼───────────────────┼────────────────────────────┤
//! │ InvalidCredentials      │ InsufficientScope │ ValidationError            │
//! │ TokenExpired            │ MethodNotAllowed  │ BadRequest                 │
//! │ TokenInvalid            │ IpBlocked         │ InvalidUuid                │
//! │ TokenRevoked            │ AccountLocked     │ OtpExpired                 │
//! │ TokenBlacklisted        │ Banned            │                            │
//! │ MissingAuth             │ AccessDenied      │                            │
//! ├─────────────────────────┴───────────────────┴────────────────────────────┤
//! │ Resources (404, 409)    │ Rate Limit (429)  │ Server (500, 502)          │
//! ├─────────────────────────┼───────────────────┼────────────────────────────┤
//! │ NotFound                │ RateLimited       │ DatabaseError              │
//! │ Conflict                │                   │ RedisError                 │
//! │ OtpConsumed (409)       │                   │ InternalError              │
//! │                         │                   │ ProviderUnavailable (502)  │
//! └─────────────────────────┴───────────────────┴────────────────────────────┘
//! ```
//!
//! ## HTTP Response Format
//!
//! All errors are serialized to a consistent JSON format:
//!
//! ```json
//! {
//!   "code": "METHOD_NOT_ALLOWED",
//!   "message": "Authentication method not allowed for this application",
//!   "request_id": "550e8400-e29b-41d4-a716-446655440000",
//!   "details": { ... },
//!   "timestamp": "2024-01-15T10:30:00Z"
//! }
//! ```
//!
//! ## Transport Integration
//!
//! - **Actix-web**: `impl ResponseError for ApiError`
//! - **tonic**: `impl From<ApiError> for tonic::Status`
//!
//! Both delegate to [`ApiError::status_code`] / [`ApiError::grpc_code`], the
//! single source of truth for the mapping. Messages never echo credential
//! material and never reveal whether an email exists.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for handlers and services.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Main Error Enum
// =============================================================================

/// Application error type with automatic status mapping on both transports.
///
/// Each variant represents a specific error condition. The `#[error]`
/// attribute defines the message format; messages are intentionally generic
/// for anything credential-related.
#[derive(Debug, Error)]
pub enum ApiError {
    // =========================================================================
    // Authentication Errors (401 Unauthorized / UNAUTHENTICATED)
    // =========================================================================

    /// Wrong credential of any kind (password, OTP code, client secret).
    /// Generic message prevents user enumeration.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token signature is valid but the token is past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// Token is malformed, has an unknown kid, a bad signature, or the
    /// wrong type for the operation.
    #[error("Invalid token")]
    TokenInvalid,

    /// Token was valid but its session has been revoked.
    #[error("Token revoked")]
    TokenRevoked,

    /// Token was explicitly blacklisted (logout before expiry).
    #[error("Token revoked")]
    TokenBlacklisted,

    /// Request doesn't include any of the accepted credentials
    /// (Bearer JWT, `agw_` API key, `app_` application secret).
    #[error("Missing authentication")]
    MissingAuth,

    // =========================================================================
    // Authorization Errors (403 Forbidden / PERMISSION_DENIED)
    // =========================================================================

    /// Credential is valid but lacks the scope the operation requires.
    #[error("Insufficient scope: {required}")]
    InsufficientScope {
        /// The scope that would have been needed
        required: String,
    },

    /// The application's `allowed_auth_methods` does not include the
    /// method the caller invoked.
    #[error("Authentication method not allowed for this application")]
    MethodNotAllowed {
        /// The rejected method, e.g. "password"
        method: String,
    },

    /// Caller IP is blacklisted, or a whitelist exists and the IP is
    /// not on it.
    #[error("Access from this address is not allowed")]
    IpBlocked,

    /// Account temporarily locked after repeated failures.
    /// 403 on the wire; distinct audit category.
    #[error("Account locked")]
    AccountLocked {
        /// When the account will be automatically unlocked
        until: chrono::DateTime<chrono::Utc>,
    },

    /// The user's profile in the target application is banned.
    /// Short-circuits authentication regardless of credential correctness.
    #[error("Account banned in this application")]
    Banned {
        /// Ban reason as recorded on the profile, if any
        reason: Option<String>,
    },

    /// Ownership or application cross-check failed (e.g. token
    /// `application_id` disagrees with the stated application).
    #[error("Resource access denied")]
    AccessDenied,

    // =========================================================================
    // Validation Errors (400 Bad Request / INVALID_ARGUMENT)
    // =========================================================================

    /// Request body failed validation rules.
    /// Contains field-level errors from the `validator` crate.
    #[error("Validation error")]
    ValidationError(#[from] ValidationErrors),

    /// Generic bad request with custom message.
    #[error("Invalid input: {message}")]
    BadRequest {
        /// Human-readable description of what's wrong
        message: String,
    },

    /// UUID parsing failed.
    #[error("Invalid UUID format")]
    InvalidUuid,

    /// OTP exists but its validity window has passed.
    #[error("Code expired")]
    OtpExpired,

    // =========================================================================
    // Resource Errors (404 Not Found, 409 Conflict)
    // =========================================================================

    /// Requested resource doesn't exist.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Resource identifier (e.g., "user:123", "application:app-1")
        resource: String,
    },

    /// Action would create a duplicate or violate a single-use guarantee
    /// (duplicate email/phone/username, replayed authorization or
    /// exchange code).
    #[error("Resource already exists: {resource}")]
    Conflict {
        /// Description of the conflict (e.g., "email already registered")
        resource: String,
    },

    /// OTP was already consumed. Single-use is irreversible.
    #[error("Code already used")]
    OtpConsumed,

    // =========================================================================
    // Rate Limiting (429 Too Many Requests / RESOURCE_EXHAUSTED)
    // =========================================================================

    /// Client has exceeded request or OTP-send rate limits.
    #[error("Too many requests")]
    RateLimited {
        /// Seconds until the client can retry
        retry_after_seconds: u64,
    },

    // =========================================================================
    // Server Errors (500 / 502)
    // =========================================================================
    // Details are NOT exposed to clients for security.

    /// PostgreSQL query failed.
    /// Wraps `sqlx::Error`. Details logged, generic message returned.
    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    /// Redis operation failed.
    #[error("Redis error")]
    RedisError(#[from] redis::RedisError),

    /// Downstream email/SMS/OAuth provider failed.
    /// Returns 502 Bad Gateway / UNAVAILABLE.
    #[error("Upstream provider unavailable")]
    ProviderUnavailable {
        /// Name of the failing provider
        provider: String,
    },

    /// Unspecified internal error. Last resort.
    #[error("Internal server error")]
    InternalError {
        /// Internal message for logging (not exposed to client)
        message: String,
    },
}

// =============================================================================
// Error Methods
// =============================================================================

impl ApiError {
    /// Returns a machine-readable error code.
    ///
    /// These codes are stable and double as the audit-log error category,
    /// which is how `TOKEN_EXPIRED` / `TOKEN_REVOKED` / `TOKEN_BLACKLISTED`
    /// stay distinguishable even though all three surface as 401.
    pub fn error_code(&self) -> &'static str {
        match self {
            // Authentication
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::TokenBlacklisted => "TOKEN_BLACKLISTED",
            Self::MissingAuth => "MISSING_AUTH",
            // Authorization
            Self::InsufficientScope { .. } => "INSUFFICIENT_SCOPE",
            Self::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Self::IpBlocked => "IP_BLOCKED",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::Banned { .. } => "BANNED",
            Self::AccessDenied => "ACCESS_DENIED",
            // Validation
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::InvalidUuid => "INVALID_UUID",
            Self::OtpExpired => "OTP_EXPIRED",
            // Resources
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::OtpConsumed => "OTP_CONSUMED",
            // Rate limiting
            Self::RateLimited { .. } => "RATE_LIMITED",
            // Server
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::RedisError(_) => "REDIS_ERROR",
            Self::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            Self::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    ///
    /// This is the source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 401 Unauthorized - Authentication required or failed
            Self::InvalidCredentials
            | Self::TokenExpired
            | Self::TokenInvalid
            | Self::TokenRevoked
            | Self::TokenBlacklisted
            | Self::MissingAuth => StatusCode::UNAUTHORIZED,

            // 403 Forbidden - Authenticated but not allowed
            Self::InsufficientScope { .. }
            | Self::MethodNotAllowed { .. }
            | Self::IpBlocked
            | Self::AccountLocked { .. }
            | Self::Banned { .. }
            | Self::AccessDenied => StatusCode::FORBIDDEN,

            // 400 Bad Request - Client sent invalid data
            Self::ValidationError(_)
            | Self::BadRequest { .. }
            | Self::InvalidUuid
            | Self::OtpExpired => StatusCode::BAD_REQUEST,

            // 404 Not Found
            Self::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict - Duplicates and replayed single-use artefacts
            Self::Conflict { .. } | Self::OtpConsumed => StatusCode::CONFLICT,

            // 429 Too Many Requests
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 502 Bad Gateway - Dependency is down
            Self::ProviderUnavailable { .. } => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            Self::DatabaseError(_) | Self::RedisError(_) | Self::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the gRPC status code for this error.
    ///
    /// Used by the tonic adapter; mirrors [`Self::status_code`].
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            Self::InvalidCredentials
            | Self::TokenExpired
            | Self::TokenInvalid
            | Self::TokenRevoked
            | Self::TokenBlacklisted
            | Self::MissingAuth => tonic::Code::Unauthenticated,

            Self::InsufficientScope { .. }
            | Self::MethodNotAllowed { .. }
            | Self::IpBlocked
            | Self::AccountLocked { .. }
            | Self::Banned { .. }
            | Self::AccessDenied => tonic::Code::PermissionDenied,

            Self::ValidationError(_)
            | Self::BadRequest { .. }
            | Self::InvalidUuid
            | Self::OtpExpired => tonic::Code::InvalidArgument,

            Self::NotFound { .. } => tonic::Code::NotFound,

            Self::Conflict { .. } | Self::OtpConsumed => tonic::Code::AlreadyExists,

            Self::RateLimited { .. } => tonic::Code::ResourceExhausted,

            Self::ProviderUnavailable { .. } => tonic::Code::Unavailable,

            Self::DatabaseError(_) | Self::RedisError(_) | Self::InternalError { .. } => {
                tonic::Code::Internal
            }
        }
    }

    /// Returns `true` if this is a server-side error (5xx).
    ///
    /// Server errors are logged at ERROR level and never expose internal
    /// details to clients. Client errors (4xx) are logged at WARN level.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_)
                | Self::RedisError(_)
                | Self::InternalError { .. }
                | Self::ProviderUnavailable { .. }
        )
    }

    /// Maps a storage error, converting known unique-constraint violations
    /// into `Conflict` and everything else into `DatabaseError`.
    ///
    /// Repositories call this so duplicate email/phone/username surface as
    /// 409 instead of 500.
    pub fn from_sqlx(e: sqlx::Error, conflict_resource: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return Self::Conflict {
                    resource: conflict_resource.to_string(),
                };
            }
        }
        Self::DatabaseError(e)
    }
}

// =============================================================================
// Response Structure
// =============================================================================

/// Standard error response body for the REST API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code for programmatic handling
    pub code: String,

    /// Human-readable message (for debugging, not for user display)
    pub message: String,

    /// Request ID for tracing across services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Additional error details (varies by error type).
    /// - ValidationError: Field-level errors
    /// - RateLimited: `retry_after_seconds`
    /// - AccountLocked: `locked_until`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// When the error occurred (ISO 8601 format)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorResponse {
    /// Creates a new error response from an `ApiError`.
    pub fn new(error: &ApiError) -> Self {
        // Extract type-specific details
        let details = match error {
            ApiError::ValidationError(errors) => {
                Some(serde_json::to_value(errors).unwrap_or_default())
            }
            ApiError::RateLimited {
                retry_after_seconds,
            } => Some(serde_json::json!({ "retry_after_seconds": retry_after_seconds })),
            ApiError::AccountLocked { until } => {
                Some(serde_json::json!({ "locked_until": until }))
            }
            // Server errors: never expose internals
            ApiError::DatabaseError(_)
            | ApiError::RedisError(_)
            | ApiError::InternalError { .. } => None,
            _ => None,
        };

        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            request_id: None,
            details,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Adds a request ID for tracing.
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }
}

// =============================================================================
// Actix-web Integration
// =============================================================================

/// Implements Actix-web's `ResponseError` trait.
///
/// This allows returning `ApiError` directly from handlers; the error is
/// automatically converted to an HTTP response with the right status code
/// and an `ErrorResponse` JSON body. A `Retry-After` header is attached
/// for rate-limited responses.
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        // Delegate to our implementation
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let response = ErrorResponse::new(self);
        let mut builder = HttpResponse::build(self.status_code());
        if let ApiError::RateLimited {
            retry_after_seconds,
        } = self
        {
            builder.insert_header(("Retry-After", retry_after_seconds.to_string()));
        }
        builder.json(response)
    }
}

// =============================================================================
// tonic Integration
// =============================================================================

/// Converts an `ApiError` into a gRPC status.
///
/// The stable error code travels in `x-error-code` metadata so callers can
/// distinguish e.g. TOKEN_EXPIRED from TOKEN_REVOKED without parsing text.
impl From<ApiError> for tonic::Status {
    fn from(error: ApiError) -> Self {
        let mut status = tonic::Status::new(error.grpc_code(), error.to_string());
        if let Ok(value) = error
            .error_code()
            .parse::<tonic::metadata::MetadataValue<tonic::metadata::Ascii>>()
        {
            status.metadata_mut().insert("x-error-code", value);
        }
        status
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_errors_return_401() {
        assert_eq!(
            ApiError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::TokenInvalid.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::TokenRevoked.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::TokenBlacklisted.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::MissingAuth.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_authorization_errors_return_403() {
        assert_eq!(
            ApiError::MethodNotAllowed {
                method: "password".to_string()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::IpBlocked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Banned { reason: None }.status_code(),
            StatusCode::FORBIDDEN
        );
        // Lockout is 403, not 401: the credential may be correct
        assert_eq!(
            ApiError::AccountLocked {
                until: chrono::Utc::now()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_replayed_single_use_artefacts_conflict() {
        assert_eq!(ApiError::OtpConsumed.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Conflict {
                resource: "authorization code".to_string()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_provider_failure_is_bad_gateway() {
        let err = ApiError::ProviderUnavailable {
            provider: "smtp".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.grpc_code(), tonic::Code::Unavailable);
    }

    #[test]
    fn test_grpc_mapping_matches_http_families() {
        assert_eq!(
            ApiError::MissingAuth.grpc_code(),
            tonic::Code::Unauthenticated
        );
        assert_eq!(
            ApiError::InsufficientScope {
                required: "users:read".to_string()
            }
            .grpc_code(),
            tonic::Code::PermissionDenied
        );
        assert_eq!(
            ApiError::RateLimited {
                retry_after_seconds: 60
            }
            .grpc_code(),
            tonic::Code::ResourceExhausted
        );
        assert_eq!(ApiError::OtpConsumed.grpc_code(), tonic::Code::AlreadyExists);
    }

    #[test]
    fn test_token_errors_distinguished_by_code() {
        // All 401 on the wire, but audit categories differ
        assert_eq!(ApiError::TokenExpired.error_code(), "TOKEN_EXPIRED");
        assert_eq!(ApiError::TokenRevoked.error_code(), "TOKEN_REVOKED");
        assert_eq!(ApiError::TokenBlacklisted.error_code(), "TOKEN_BLACKLISTED");
    }

    #[test]
    fn test_server_errors_are_flagged() {
        assert!(ApiError::InternalError {
            message: "test".to_string()
        }
        .is_server_error());
        assert!(ApiError::ProviderUnavailable {
            provider: "sms".to_string()
        }
        .is_server_error());
        assert!(!ApiError::InvalidCredentials.is_server_error());
        assert!(!ApiError::OtpConsumed.is_server_error());
    }

    #[test]
    fn test_error_response_includes_retry_hint() {
        let error = ApiError::RateLimited {
            retry_after_seconds: 42,
        };
        let response = ErrorResponse::new(&error);
        assert_eq!(
            response.details.unwrap()["retry_after_seconds"],
            serde_json::json!(42)
        );
    }
}
