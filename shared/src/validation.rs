//! # Request Validation Helpers
//!
//! Utilities for validating incoming request data using the `validator` crate.
//!
//! ## How Validation Works
//!
//! We use the [`validator`](https://docs.rs/validator/) crate which provides
//! derive macros for declarative validation:
//!
//! ```rust,ignore
//! use validator::Validate;
//!
//! #[derive(Validate)]
//! struct SignInRequest {
//!     #[validate(email)]
//!     email: String,
//!
//!     #[validate(length(min = 1))]
//!     password: String,
//! }
//! ```
//!
//! When validation fails, the API returns a 400 Bad Request with
//! field-level details (see [`crate::errors::ErrorResponse`]).
//!
//! ## Custom Validators
//!
//! | Validator | Purpose |
//! |-----------|---------|
//! | `not_blank` | String is not empty after trimming |
//! | `valid_slug` | URL-safe slug format (application names) |
//! | `valid_e164` | International phone number format |

use crate::errors::ApiError;
use serde::de::DeserializeOwned;
use validator::Validate;

// =============================================================================
// Core Validation Functions
// =============================================================================

/// Validates a request DTO that implements `Validate`.
///
/// This is the primary validation function. Use it in handlers to
/// validate incoming data:
///
/// ```rust,ignore
/// async fn signin(body: Json<SignInRequest>) -> Result<impl Responder, ApiError> {
///     validate_request(&body)?;  // Returns early if invalid
///     // Continue with validated data
/// }
/// ```
///
/// ## Errors
///
/// Returns `ApiError::ValidationError` with field-level details.
pub fn validate_request<T: Validate>(data: &T) -> Result<(), ApiError> {
    data.validate().map_err(ApiError::ValidationError)
}

/// Parses JSON string and validates in a single step.
///
/// Useful when you have raw JSON and need to parse + validate.
///
/// ## Errors
///
/// - `ApiError::BadRequest` if JSON parsing fails
/// - `ApiError::ValidationError` if validation fails
pub fn parse_and_validate<T: DeserializeOwned + Validate>(json: &str) -> Result<T, ApiError> {
    let data: T = serde_json::from_str(json).map_err(|e| ApiError::BadRequest {
        message: e.to_string(),
    })?;

    validate_request(&data)?;

    Ok(data)
}

/// Normalizes an email for storage and lookup: trimmed, lowercased.
///
/// Uniqueness of `users.email` is enforced on the normalized form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// =============================================================================
// Custom Validators
// =============================================================================

/// Custom validation functions for use with `#[validate(custom)]`.
pub mod validators {
    use validator::ValidationError;

    /// Validates that a string is not blank (empty or whitespace-only).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("blank"));
        }
        Ok(())
    }

    /// Validates a URL-safe slug format.
    ///
    /// ## Rules
    ///
    /// - Only lowercase letters, digits, and hyphens
    /// - Cannot start or end with hyphen
    /// - No consecutive hyphens
    pub fn valid_slug(value: &str) -> Result<(), ValidationError> {
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::new("invalid_slug"));
        }

        if value.starts_with('-') || value.ends_with('-') {
            return Err(ValidationError::new("invalid_slug"));
        }

        if value.contains("--") {
            return Err(ValidationError::new("invalid_slug"));
        }

        Ok(())
    }

    /// Validates an E.164 phone number: `+` followed by 8-15 digits,
    /// first digit non-zero.
    pub fn valid_e164(value: &str) -> Result<(), ValidationError> {
        let rest = match value.strip_prefix('+') {
            Some(rest) => rest,
            None => return Err(ValidationError::new("invalid_phone")),
        };

        if rest.len() < 8 || rest.len() > 15 {
            return Err(ValidationError::new("invalid_phone"));
        }

        if !rest.chars().all(|c| c.is_ascii_digit()) || rest.starts_with('0') {
            return Err(ValidationError::new("invalid_phone"));
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::validators::*;
    use super::*;

    #[test]
    fn test_not_blank_valid() {
        assert!(not_blank("hello").is_ok());
        assert!(not_blank("  hello  ").is_ok());
    }

    #[test]
    fn test_not_blank_invalid() {
        assert!(not_blank("").is_err());
        assert!(not_blank("   ").is_err());
        assert!(not_blank("\t\n").is_err());
    }

    #[test]
    fn test_valid_slug_valid() {
        assert!(valid_slug("my-app").is_ok());
        assert!(valid_slug("app123").is_ok());
        assert!(valid_slug("a").is_ok());
    }

    #[test]
    fn test_valid_slug_invalid() {
        assert!(valid_slug("My-App").is_err()); // uppercase
        assert!(valid_slug("-invalid").is_err());
        assert!(valid_slug("invalid-").is_err());
        assert!(valid_slug("in--valid").is_err());
        assert!(valid_slug("my_app").is_err()); // underscore
        assert!(valid_slug("my app").is_err()); // space
    }

    #[test]
    fn test_valid_e164() {
        assert!(valid_e164("+12025550123").is_ok());
        assert!(valid_e164("+491701234567").is_ok());
        assert!(valid_e164("12025550123").is_err()); // no plus
        assert!(valid_e164("+0123456789").is_err()); // leading zero
        assert!(valid_e164("+123").is_err()); // too short
        assert!(valid_e164("+1202555abc").is_err()); // letters
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  User@Example.COM "), "user@example.com");
        assert_eq!(normalize_email("a@b.c"), "a@b.c");
    }
}
