//! API Key repository trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

use super::entity::{ApiKey, ApiKeyId, NewApiKey};
use crate::domain::DomainError;

/// Repository trait for API key storage
#[async_trait]
pub trait ApiKeyRepository: Send + Sync + Debug {
    /// Get an API key by its key prefix (the authentication lookup path)
    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, DomainError>;

    /// Get an API key by its ID
    async fn get(&self, id: ApiKeyId) -> Result<Option<ApiKey>, DomainError>;

    /// Persist a newly issued key; the store assigns its ID
    async fn create(&self, new_key: NewApiKey) -> Result<ApiKey, DomainError>;

    /// Update an existing API key
    async fn update(&self, api_key: &ApiKey) -> Result<ApiKey, DomainError>;

    /// List keys belonging to an agent within a company, newest first
    async fn list_by_agent(&self, agent_id: i64, company_id: i64)
        -> Result<Vec<ApiKey>, DomainError>;

    /// Record that a key authenticated successfully at `at`
    async fn touch_last_used(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<(), DomainError>;
}
