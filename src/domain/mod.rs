//! Domain layer - Core business logic and entities

pub mod api_key;
pub mod error;
pub mod rate_limit;

pub use api_key::{
    ApiKey, ApiKeyId, ApiKeyRepository, ApiKeyValidationError, AuthError, InvalidReason, KeyState,
    NewApiKey, PermissionScope, Principal, RateLimits, UsageLogRepository, UsageRecord,
};
pub use error::DomainError;
pub use rate_limit::{Admission, Clock, RateLimitStore, RateWindow, SystemClock};
