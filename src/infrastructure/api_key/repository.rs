//! In-memory API key repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::api_key::{ApiKey, ApiKeyId, ApiKeyRepository, NewApiKey};
use crate::domain::DomainError;

#[derive(Debug, Default)]
struct Tables {
    keys: HashMap<ApiKeyId, ApiKey>,
    prefix_index: HashMap<String, ApiKeyId>,
}

/// In-memory implementation of ApiKeyRepository
///
/// Keys and the prefix index live behind one lock so lookups always see a
/// consistent pair.
#[derive(Debug)]
pub struct InMemoryApiKeyRepository {
    tables: Arc<RwLock<Tables>>,
    next_id: AtomicI64,
}

impl InMemoryApiKeyRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.tables.read().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryApiKeyRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, DomainError> {
        let tables = self.tables.read().await;

        Ok(tables
            .prefix_index
            .get(prefix)
            .and_then(|id| tables.keys.get(id))
            .cloned())
    }

    async fn get(&self, id: ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        let tables = self.tables.read().await;
        Ok(tables.keys.get(&id).cloned())
    }

    async fn create(&self, new_key: NewApiKey) -> Result<ApiKey, DomainError> {
        let mut tables = self.tables.write().await;

        if tables.prefix_index.contains_key(&new_key.key_prefix) {
            return Err(DomainError::conflict(format!(
                "API key with prefix '{}' already exists",
                new_key.key_prefix
            )));
        }

        let id = ApiKeyId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let api_key = new_key.into_api_key(id);

        tables
            .prefix_index
            .insert(api_key.key_prefix().to_string(), id);
        tables.keys.insert(id, api_key.clone());

        Ok(api_key)
    }

    async fn update(&self, api_key: &ApiKey) -> Result<ApiKey, DomainError> {
        let mut tables = self.tables.write().await;
        let id = api_key.id();

        let Some(existing) = tables.keys.get(&id) else {
            return Err(DomainError::not_found(format!("API key '{}' not found", id)));
        };

        if existing.key_prefix() != api_key.key_prefix() {
            return Err(DomainError::validation("API key prefix cannot be changed"));
        }

        tables.keys.insert(id, api_key.clone());
        Ok(api_key.clone())
    }

    async fn list_by_agent(
        &self,
        agent_id: i64,
        company_id: i64,
    ) -> Result<Vec<ApiKey>, DomainError> {
        let tables = self.tables.read().await;

        let mut result: Vec<ApiKey> = tables
            .keys
            .values()
            .filter(|k| k.agent_id() == agent_id && k.company_id() == company_id)
            .cloned()
            .collect();

        result.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });

        Ok(result)
    }

    async fn touch_last_used(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<(), DomainError> {
        let mut tables = self.tables.write().await;

        if let Some(key) = tables.keys.get_mut(&id) {
            key.record_usage(at);
            Ok(())
        } else {
            Err(DomainError::not_found(format!("API key '{}' not found", id)))
        }
    }
}
