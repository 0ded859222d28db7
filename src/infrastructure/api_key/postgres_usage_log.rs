//! PostgreSQL usage log implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::api_key::{ApiKeyId, UsageLogRepository, UsageRecord};
use crate::domain::DomainError;

/// Usage records in `ai_agent_api_key_usage_logs`
#[derive(Debug, Clone)]
pub struct PostgresUsageLog {
    pool: PgPool,
}

impl PostgresUsageLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageLogRepository for PostgresUsageLog {
    async fn record(&self, record: UsageRecord) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO ai_agent_api_key_usage_logs (api_key_id, agent_id, company_id, endpoint,
                                                     method, response_status, response_time_ms,
                                                     ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.api_key_id.value())
        .bind(record.agent_id)
        .bind(record.company_id)
        .bind(&record.endpoint)
        .bind(&record.method)
        .bind(i32::from(record.response_status))
        .bind(i64::from(record.response_time_ms))
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to record API key usage: {}", e)))?;

        Ok(())
    }

    async fn list_by_key(
        &self,
        key_id: ApiKeyId,
        limit: usize,
    ) -> Result<Vec<UsageRecord>, DomainError> {
        let rows = sqlx::query(
            r#"
            SELECT api_key_id, agent_id, company_id, endpoint, method, response_status,
                   response_time_ms, ip_address, user_agent, created_at
            FROM ai_agent_api_key_usage_logs
            WHERE api_key_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(key_id.value())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to list API key usage: {}", e)))?;

        rows.iter().map(row_to_usage_record).collect()
    }
}

fn row_to_usage_record(row: &PgRow) -> Result<UsageRecord, DomainError> {
    let column_error =
        |e: sqlx::Error| DomainError::storage(format!("Invalid usage row in database: {}", e));

    let api_key_id: i64 = row.try_get("api_key_id").map_err(column_error)?;
    let response_status: i32 = row.try_get("response_status").map_err(column_error)?;
    let response_time_ms: i64 = row.try_get("response_time_ms").map_err(column_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(column_error)?;

    Ok(UsageRecord {
        api_key_id: ApiKeyId::new(api_key_id),
        agent_id: row.try_get("agent_id").map_err(column_error)?,
        company_id: row.try_get("company_id").map_err(column_error)?,
        endpoint: row.try_get("endpoint").map_err(column_error)?,
        method: row.try_get("method").map_err(column_error)?,
        response_status: status_from_column(response_status)?,
        response_time_ms: u32::try_from(response_time_ms.max(0)).unwrap_or(u32::MAX),
        ip_address: row.try_get("ip_address").map_err(column_error)?,
        user_agent: row.try_get("user_agent").map_err(column_error)?,
        created_at,
    })
}

fn status_from_column(value: i32) -> Result<u16, DomainError> {
    u16::try_from(value)
        .map_err(|_| DomainError::storage(format!("Invalid response_status in database: {}", value)))
}
