//! API Key domain
//!
//! Domain types and traits for agent API keys: the stored key record,
//! its permission scope and rate budgets, the resolved [`Principal`], the
//! per-request usage trail and the authentication failure taxonomy used by
//! the gateway.

mod entity;
mod error;
mod permission;
mod principal;
mod repository;
mod usage;
mod validation;

pub use entity::{ApiKey, ApiKeyId, KeyState, NewApiKey, RateLimits};
pub use error::{AuthError, InvalidReason};
pub use permission::PermissionScope;
pub use principal::Principal;
pub use repository::ApiKeyRepository;
pub use usage::{UsageLogRepository, UsageRecord, MAX_USAGE_FIELD_LENGTH};
pub use validation::{
    parse_rate_limit, validate_expiry, validate_key_name, ApiKeyValidationError,
    MAX_KEY_NAME_LENGTH,
};

#[cfg(test)]
pub use repository::mock;
