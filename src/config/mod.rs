//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, GatewayConfig, HasherKind, LogFormat, LoggingConfig, RateLimitBackend,
    RateLimitConfig, ServerConfig, StorageBackend, StorageConfig, TelemetryConfig,
    DEV_HASH_PEPPER,
};
