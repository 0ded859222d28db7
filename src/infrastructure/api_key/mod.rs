//! API Key infrastructure implementations
//!
//! Key generation and hashing, key stores, usage logs, rate limit stores and the
//! validator/gateway pair that turns a presented secret into a decision.

mod cached_repository;
mod gateway;
mod generator;
mod hasher;
mod postgres_repository;
mod postgres_usage_log;
mod rate_limiter;
mod redis_rate_limiter;
mod repository;
mod service;
mod usage_log;
mod validator;

pub use cached_repository::CachedApiKeyRepository;
pub use gateway::AgentGateway;
pub use generator::{ApiKeyGenerator, GeneratedApiKey, PREFIX_RANDOM_CHARS};
pub use hasher::{Argon2KeyHasher, HmacKeyHasher, KeyHasher};
pub use postgres_repository::{PostgresApiKeyRepository, PostgresConfig};
pub use postgres_usage_log::PostgresUsageLog;
pub use rate_limiter::{spawn_sweeper, InMemoryRateLimiter};
pub use redis_rate_limiter::RedisRateLimiter;
pub use repository::InMemoryApiKeyRepository;
pub use service::{ApiKeyService, IssueApiKeyRequest, IssuedApiKey, UpdateApiKeyRequest};
pub use usage_log::InMemoryUsageLog;
pub use validator::{ApiKeyValidator, DEFAULT_LOOKUP_TIMEOUT};
