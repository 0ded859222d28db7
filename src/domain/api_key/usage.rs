//! Per-request audit trail for agent calls

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::entity::ApiKeyId;
use super::principal::Principal;
use crate::domain::DomainError;

/// Stored endpoint and user agent are cut to this many characters
pub const MAX_USAGE_FIELD_LENGTH: usize = 500;

/// One authorized agent request and how it was answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub api_key_id: ApiKeyId,
    pub agent_id: i64,
    pub company_id: i64,
    pub endpoint: String,
    pub method: String,
    pub response_status: u16,
    pub response_time_ms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Start a record for a request the gateway let through
    pub fn started(
        principal: &Principal,
        method: impl Into<String>,
        endpoint: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            api_key_id: principal.key_id(),
            agent_id: principal.agent_id(),
            company_id: principal.company_id(),
            endpoint: truncate(endpoint),
            method: method.into(),
            response_status: 0,
            response_time_ms: 0,
            ip_address: None,
            user_agent: None,
            created_at: at,
        }
    }

    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<&str>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent.map(truncate);
        self
    }

    /// Fill in the outcome once the handler has answered
    pub fn completed(mut self, status: u16, elapsed: Duration) -> Self {
        self.response_status = status;
        self.response_time_ms = u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX);
        self
    }
}

fn truncate(value: &str) -> String {
    value.chars().take(MAX_USAGE_FIELD_LENGTH).collect()
}

/// Append-only sink for usage records
#[async_trait]
pub trait UsageLogRepository: Send + Sync + Debug {
    async fn record(&self, record: UsageRecord) -> Result<(), DomainError>;

    /// Most recent records for a key, newest first
    async fn list_by_key(
        &self,
        key_id: ApiKeyId,
        limit: usize,
    ) -> Result<Vec<UsageRecord>, DomainError>;
}
