//! In-memory usage log

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::api_key::{ApiKeyId, UsageLogRepository, UsageRecord};
use crate::domain::DomainError;

const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded in-process usage log; the oldest records drop off first
#[derive(Debug)]
pub struct InMemoryUsageLog {
    records: RwLock<VecDeque<UsageRecord>>,
    capacity: usize,
}

impl InMemoryUsageLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }
}

impl Default for InMemoryUsageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageLogRepository for InMemoryUsageLog {
    async fn record(&self, record: UsageRecord) -> Result<(), DomainError> {
        let mut records = self.records.write().await;

        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);

        Ok(())
    }

    async fn list_by_key(
        &self,
        key_id: ApiKeyId,
        limit: usize,
    ) -> Result<Vec<UsageRecord>, DomainError> {
        let records = self.records.read().await;

        Ok(records
            .iter()
            .rev()
            .filter(|r| r.api_key_id == key_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api_key::{PermissionScope, Principal, RateLimits};
    use chrono::Utc;
    use std::time::Duration;

    fn record(key_id: i64, endpoint: &str) -> UsageRecord {
        let principal = Principal::new(
            ApiKeyId::new(key_id),
            1,
            1,
            PermissionScope::All,
            RateLimits::unlimited(),
        );

        UsageRecord::started(&principal, "GET", endpoint, Utc::now())
            .completed(200, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_list_by_key_newest_first() {
        let log = InMemoryUsageLog::new();

        log.record(record(1, "/a")).await.unwrap();
        log.record(record(2, "/b")).await.unwrap();
        log.record(record(1, "/c")).await.unwrap();

        let listed = log.list_by_key(ApiKeyId::new(1), 10).await.unwrap();
        let endpoints: Vec<_> = listed.iter().map(|r| r.endpoint.as_str()).collect();

        assert_eq!(endpoints, vec!["/c", "/a"]);
        assert_eq!(log.list_by_key(ApiKeyId::new(1), 1).await.unwrap().len(), 1);
        assert!(log.list_by_key(ApiKeyId::new(3), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let log = InMemoryUsageLog::with_capacity(2);

        log.record(record(1, "/first")).await.unwrap();
        log.record(record(1, "/second")).await.unwrap();
        log.record(record(1, "/third")).await.unwrap();

        let listed = log.list_by_key(ApiKeyId::new(1), 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed.last().unwrap().endpoint, "/second");
    }
}
