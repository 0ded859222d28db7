//! API Key validation utilities

use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::rate_limit::RateWindow;

/// Errors that can occur when validating key issue/update input
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiKeyValidationError {
    #[error("Key name cannot be empty")]
    EmptyName,

    #[error("Key name exceeds maximum length of {0} characters")]
    NameTooLong(usize),

    #[error("Expiration date must be in the future")]
    ExpiryInPast,

    #[error("Rate limit per {0} must be greater than 0")]
    NonPositiveRateLimit(RateWindow),

    #[error("Rate limit per {0} exceeds maximum of {max}", max = u32::MAX)]
    RateLimitTooLarge(RateWindow),
}

pub const MAX_KEY_NAME_LENGTH: usize = 100;

/// Validate a human-readable key name
///
/// Rules:
/// - Cannot be empty or whitespace only
/// - Maximum 100 characters
pub fn validate_key_name(name: &str) -> Result<(), ApiKeyValidationError> {
    if name.trim().is_empty() {
        return Err(ApiKeyValidationError::EmptyName);
    }

    if name.chars().count() > MAX_KEY_NAME_LENGTH {
        return Err(ApiKeyValidationError::NameTooLong(MAX_KEY_NAME_LENGTH));
    }

    Ok(())
}

/// Validate an optional expiration date against `now`
pub fn validate_expiry(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), ApiKeyValidationError> {
    match expires_at {
        Some(at) if at <= now => Err(ApiKeyValidationError::ExpiryInPast),
        _ => Ok(()),
    }
}

/// Parse a caller-supplied rate limit; `None` stays unlimited
pub fn parse_rate_limit(
    value: Option<i64>,
    window: RateWindow,
) -> Result<Option<NonZeroU32>, ApiKeyValidationError> {
    let Some(value) = value else {
        return Ok(None);
    };

    if value <= 0 {
        return Err(ApiKeyValidationError::NonPositiveRateLimit(window));
    }

    let value = u32::try_from(value).map_err(|_| ApiKeyValidationError::RateLimitTooLarge(window))?;
    Ok(NonZeroU32::new(value))
}
