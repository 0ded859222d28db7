//! PostgreSQL API key repository implementation

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::domain::api_key::{
    ApiKey, ApiKeyId, ApiKeyRepository, NewApiKey, PermissionScope, RateLimits,
};
use crate::domain::DomainError;

use super::postgres_usage_log::PostgresUsageLog;

const SELECT_COLUMNS: &str = r#"
    id, agent_id, company_id, key_name, key_hash, key_prefix, permissions,
    rate_limit_per_minute, rate_limit_per_hour, is_active, expires_at,
    revoked_at, last_used_at, created_by_user_id, created_at, updated_at
"#;

/// PostgreSQL connection settings
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/crm".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// PostgreSQL implementation of ApiKeyRepository
#[derive(Debug, Clone)]
pub struct PostgresApiKeyRepository {
    pool: PgPool,
}

impl PostgresApiKeyRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pooled connection and wrap it
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DomainError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to connect to PostgreSQL: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Usage log sharing this repository's pool
    pub fn usage_log(&self) -> PostgresUsageLog {
        PostgresUsageLog::new(self.pool.clone())
    }

    /// Ensures the key and usage tables and their indexes exist
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS ai_agent_api_keys (
                id BIGSERIAL PRIMARY KEY,
                agent_id BIGINT NOT NULL,
                company_id BIGINT NOT NULL,
                key_name VARCHAR(100) NOT NULL,
                key_hash TEXT NOT NULL,
                key_prefix VARCHAR(64) NOT NULL UNIQUE,
                permissions JSONB,
                rate_limit_per_minute BIGINT,
                rate_limit_per_hour BIGINT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                expires_at TIMESTAMPTZ,
                revoked_at TIMESTAMPTZ,
                last_used_at TIMESTAMPTZ,
                created_by_user_id BIGINT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_ai_agent_api_keys_agent
                ON ai_agent_api_keys (agent_id, company_id)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ai_agent_api_key_usage_logs (
                id BIGSERIAL PRIMARY KEY,
                api_key_id BIGINT NOT NULL REFERENCES ai_agent_api_keys (id),
                agent_id BIGINT NOT NULL,
                company_id BIGINT NOT NULL,
                endpoint VARCHAR(500) NOT NULL,
                method VARCHAR(16) NOT NULL,
                response_status INTEGER NOT NULL,
                response_time_ms BIGINT NOT NULL,
                ip_address VARCHAR(64),
                user_agent VARCHAR(500),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_ai_agent_api_key_usage_logs_key
                ON ai_agent_api_key_usage_logs (api_key_id, created_at DESC)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DomainError::storage(format!("Failed to create schema: {}", e)))?;
        }

        Ok(())
    }
}

#[async_trait]
impl ApiKeyRepository for PostgresApiKeyRepository {
    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, DomainError> {
        let query = format!(
            "SELECT {} FROM ai_agent_api_keys WHERE key_prefix = $1",
            SELECT_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to get API key by prefix: {}", e)))?;

        row.as_ref().map(row_to_api_key).transpose()
    }

    async fn get(&self, id: ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        let query = format!(
            "SELECT {} FROM ai_agent_api_keys WHERE id = $1",
            SELECT_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to get API key: {}", e)))?;

        row.as_ref().map(row_to_api_key).transpose()
    }

    async fn create(&self, new_key: NewApiKey) -> Result<ApiKey, DomainError> {
        let query = format!(
            r#"
            INSERT INTO ai_agent_api_keys (agent_id, company_id, key_name, key_hash, key_prefix,
                                           permissions, rate_limit_per_minute, rate_limit_per_hour,
                                           is_active, expires_at, created_by_user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, $10)
            RETURNING {}
            "#,
            SELECT_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(new_key.agent_id)
            .bind(new_key.company_id)
            .bind(&new_key.key_name)
            .bind(&new_key.secret_hash)
            .bind(&new_key.key_prefix)
            .bind(permissions_to_json(&new_key.permissions))
            .bind(limit_to_column(new_key.rate_limits.per_minute))
            .bind(limit_to_column(new_key.rate_limits.per_hour))
            .bind(new_key.expires_at)
            .bind(new_key.created_by_user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let msg = e.to_string();

                if msg.contains("duplicate key") || msg.contains("unique constraint") {
                    DomainError::conflict(format!(
                        "API key with prefix '{}' already exists",
                        new_key.key_prefix
                    ))
                } else {
                    DomainError::storage(format!("Failed to create API key: {}", e))
                }
            })?;

        row_to_api_key(&row)
    }

    async fn update(&self, api_key: &ApiKey) -> Result<ApiKey, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE ai_agent_api_keys
            SET key_name = $2, permissions = $3, rate_limit_per_minute = $4,
                rate_limit_per_hour = $5, is_active = $6, expires_at = $7,
                revoked_at = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(api_key.id().value())
        .bind(api_key.key_name())
        .bind(permissions_to_json(api_key.permissions()))
        .bind(limit_to_column(api_key.rate_limits().per_minute))
        .bind(limit_to_column(api_key.rate_limits().per_hour))
        .bind(api_key.is_active())
        .bind(api_key.expires_at())
        .bind(api_key.revoked_at())
        .bind(api_key.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to update API key: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found(format!(
                "API key '{}' not found",
                api_key.id()
            )));
        }

        Ok(api_key.clone())
    }

    async fn list_by_agent(
        &self,
        agent_id: i64,
        company_id: i64,
    ) -> Result<Vec<ApiKey>, DomainError> {
        let query = format!(
            r#"
            SELECT {} FROM ai_agent_api_keys
            WHERE agent_id = $1 AND company_id = $2
            ORDER BY created_at DESC, id DESC
            "#,
            SELECT_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(agent_id)
            .bind(company_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to list API keys: {}", e)))?;

        rows.iter().map(row_to_api_key).collect()
    }

    async fn touch_last_used(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<(), DomainError> {
        let result = sqlx::query("UPDATE ai_agent_api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id.value())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to record API key usage: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found(format!("API key '{}' not found", id)));
        }

        Ok(())
    }
}

fn row_to_api_key(row: &PgRow) -> Result<ApiKey, DomainError> {
    let column_error =
        |e: sqlx::Error| DomainError::storage(format!("Invalid API key row in database: {}", e));

    let id: i64 = row.try_get("id").map_err(column_error)?;
    let agent_id: i64 = row.try_get("agent_id").map_err(column_error)?;
    let company_id: i64 = row.try_get("company_id").map_err(column_error)?;
    let key_name: String = row.try_get("key_name").map_err(column_error)?;
    let key_hash: String = row.try_get("key_hash").map_err(column_error)?;
    let key_prefix: String = row.try_get("key_prefix").map_err(column_error)?;
    let permissions: Option<serde_json::Value> = row.try_get("permissions").map_err(column_error)?;
    let per_minute: Option<i64> = row.try_get("rate_limit_per_minute").map_err(column_error)?;
    let per_hour: Option<i64> = row.try_get("rate_limit_per_hour").map_err(column_error)?;
    let is_active: bool = row.try_get("is_active").map_err(column_error)?;
    let expires_at: Option<DateTime<Utc>> = row.try_get("expires_at").map_err(column_error)?;
    let revoked_at: Option<DateTime<Utc>> = row.try_get("revoked_at").map_err(column_error)?;
    let last_used_at: Option<DateTime<Utc>> = row.try_get("last_used_at").map_err(column_error)?;
    let created_by: Option<i64> = row.try_get("created_by_user_id").map_err(column_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(column_error)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(column_error)?;

    let mut api_key = ApiKey::new(
        ApiKeyId::new(id),
        agent_id,
        company_id,
        key_name,
        key_hash,
        key_prefix,
    )
    .with_permissions(json_to_permissions(permissions)?)
    .with_rate_limits(RateLimits::new(
        column_to_limit("rate_limit_per_minute", per_minute)?,
        column_to_limit("rate_limit_per_hour", per_hour)?,
    ))
    .with_active(is_active)
    .with_revoked_at(revoked_at)
    .with_last_used_at(last_used_at)
    .with_timestamps(created_at, updated_at);

    if let Some(expires_at) = expires_at {
        api_key = api_key.with_expiration(expires_at);
    }

    if let Some(user_id) = created_by {
        api_key = api_key.with_created_by(user_id);
    }

    Ok(api_key)
}

fn permissions_to_json(scope: &PermissionScope) -> Option<serde_json::Value> {
    scope.as_list().map(serde_json::Value::from)
}

fn json_to_permissions(value: Option<serde_json::Value>) -> Result<PermissionScope, DomainError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(PermissionScope::All),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| DomainError::storage(format!("Invalid permissions in database: {}", e))),
    }
}

fn limit_to_column(limit: Option<NonZeroU32>) -> Option<i64> {
    limit.map(|n| i64::from(n.get()))
}

/// NULL is unlimited. A stored zero or negative limit rejects the row so the
/// key fails closed instead of running unthrottled. Oversized limits saturate.
fn column_to_limit(column: &str, value: Option<i64>) -> Result<Option<NonZeroU32>, DomainError> {
    let Some(value) = value else {
        return Ok(None);
    };

    let clamped = u32::try_from(value.min(i64::from(u32::MAX))).unwrap_or(0);

    NonZeroU32::new(clamped).map(Some).ok_or_else(|| {
        DomainError::storage(format!(
            "Invalid {} in database: {} is not a positive limit",
            column, value
        ))
    })
}
