//! TTL cache in front of an API key repository
//!
//! Only the authentication lookup (`find_by_prefix`) is cached, and only for
//! keys that exist. Writes through this decorator invalidate the affected
//! entry; writes made elsewhere become visible once the TTL lapses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::api_key::{ApiKey, ApiKeyId, ApiKeyRepository, NewApiKey};
use crate::domain::DomainError;

/// Repository wrapper that caches prefix lookups with a TTL
#[derive(Debug)]
pub struct CachedApiKeyRepository {
    inner: Arc<dyn ApiKeyRepository>,
    cache: Cache<String, Arc<ApiKey>>,
}

impl CachedApiKeyRepository {
    pub fn new(inner: Arc<dyn ApiKeyRepository>, ttl: Duration) -> Self {
        Self::with_capacity(inner, ttl, 10_000)
    }

    pub fn with_capacity(inner: Arc<dyn ApiKeyRepository>, ttl: Duration, capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity)
            .build();

        Self { inner, cache }
    }

    async fn invalidate(&self, prefix: &str) {
        self.cache.invalidate(prefix).await;
    }
}

#[async_trait]
impl ApiKeyRepository for CachedApiKeyRepository {
    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, DomainError> {
        if let Some(cached) = self.cache.get(prefix).await {
            tracing::debug!(key_prefix = %prefix, "Cache hit for API key");
            return Ok(Some((*cached).clone()));
        }

        tracing::debug!(key_prefix = %prefix, "Cache miss, fetching API key");

        let found = self.inner.find_by_prefix(prefix).await?;

        if let Some(ref api_key) = found {
            self.cache
                .insert(prefix.to_string(), Arc::new(api_key.clone()))
                .await;
        }

        Ok(found)
    }

    async fn get(&self, id: ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        self.inner.get(id).await
    }

    async fn create(&self, new_key: NewApiKey) -> Result<ApiKey, DomainError> {
        self.inner.create(new_key).await
    }

    async fn update(&self, api_key: &ApiKey) -> Result<ApiKey, DomainError> {
        let updated = self.inner.update(api_key).await?;
        self.invalidate(api_key.key_prefix()).await;
        Ok(updated)
    }

    async fn list_by_agent(
        &self,
        agent_id: i64,
        company_id: i64,
    ) -> Result<Vec<ApiKey>, DomainError> {
        self.inner.list_by_agent(agent_id, company_id).await
    }

    async fn touch_last_used(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.inner.touch_last_used(id, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api_key::mock::MockApiKeyRepository;
    use crate::domain::api_key::{PermissionScope, RateLimits};

    fn new_key(prefix: &str) -> NewApiKey {
        NewApiKey {
            agent_id: 1,
            company_id: 1,
            key_name: "Cached".to_string(),
            secret_hash: "hash".to_string(),
            key_prefix: prefix.to_string(),
            permissions: PermissionScope::All,
            rate_limits: RateLimits::unlimited(),
            expires_at: None,
            created_by_user_id: None,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_inner_lookup() {
        let inner = Arc::new(MockApiKeyRepository::new());
        inner.create(new_key("sk_live_aaaaaaaa")).await.unwrap();

        let cached = CachedApiKeyRepository::new(inner.clone(), Duration::from_secs(60));

        assert!(cached.find_by_prefix("sk_live_aaaaaaaa").await.unwrap().is_some());
        assert!(cached.find_by_prefix("sk_live_aaaaaaaa").await.unwrap().is_some());

        assert_eq!(inner.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_misses_are_not_cached() {
        let inner = Arc::new(MockApiKeyRepository::new());
        let cached = CachedApiKeyRepository::new(inner.clone(), Duration::from_secs(60));

        assert!(cached.find_by_prefix("sk_live_aaaaaaaa").await.unwrap().is_none());

        inner.create(new_key("sk_live_aaaaaaaa")).await.unwrap();

        assert!(cached.find_by_prefix("sk_live_aaaaaaaa").await.unwrap().is_some());
        assert_eq!(inner.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_update_invalidates_entry() {
        let inner = Arc::new(MockApiKeyRepository::new());
        let key = inner.create(new_key("sk_live_aaaaaaaa")).await.unwrap();
        let cached = CachedApiKeyRepository::new(inner.clone(), Duration::from_secs(60));

        cached.find_by_prefix("sk_live_aaaaaaaa").await.unwrap();

        let mut revoked = key.clone();
        revoked.revoke(Utc::now());
        cached.update(&revoked).await.unwrap();

        let found = cached.find_by_prefix("sk_live_aaaaaaaa").await.unwrap().unwrap();
        assert!(found.revoked_at().is_some());
        assert_eq!(inner.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let inner = Arc::new(MockApiKeyRepository::new());
        inner.set_should_fail(true).await;
        let cached = CachedApiKeyRepository::new(inner, Duration::from_secs(60));

        assert!(cached.find_by_prefix("sk_live_aaaaaaaa").await.is_err());
    }
}
