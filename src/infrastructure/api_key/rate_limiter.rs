//! In-memory rate limiter
//!
//! Fixed, epoch-aligned minute and hour windows per key. Counters live in a
//! sharded `DashMap`, so admission for one key only ever locks that key's
//! shard. Budgets are per process; see `RedisRateLimiter` for a shared store.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::api_key::{ApiKeyId, RateLimits};
use crate::domain::rate_limit::{Admission, Clock, RateLimitStore, RateWindow, SystemClock};
use crate::domain::DomainError;

/// Counters idle for longer than this are dropped
const IDLE_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, Default)]
struct WindowCount {
    index: i64,
    count: u32,
}

impl WindowCount {
    /// Move to the window `index`, forgetting counts from older windows
    fn roll(&mut self, index: i64) {
        if self.index != index {
            self.index = index;
            self.count = 0;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    minute: WindowCount,
    hour: WindowCount,
    last_seen: i64,
}

impl Counter {
    fn new(now: i64) -> Self {
        Self {
            minute: WindowCount {
                index: RateWindow::Minute.index_at(now),
                count: 0,
            },
            hour: WindowCount {
                index: RateWindow::Hour.index_at(now),
                count: 0,
            },
            last_seen: now,
        }
    }

    fn slot_mut(&mut self, window: RateWindow) -> &mut WindowCount {
        match window {
            RateWindow::Minute => &mut self.minute,
            RateWindow::Hour => &mut self.hour,
        }
    }
}

/// Rate limiter keeping counters in process memory
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    counters: Arc<DashMap<ApiKeyId, Counter>>,
    clock: Arc<dyn Clock>,
    /// Minimum seconds between opportunistic cleanups
    cleanup_interval_secs: i64,
    last_cleanup: AtomicI64,
}

impl InMemoryRateLimiter {
    /// Create a new rate limiter on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.unix_secs();

        Self {
            counters: Arc::new(DashMap::new()),
            clock,
            cleanup_interval_secs: 300,
            last_cleanup: AtomicI64::new(now),
        }
    }

    /// Set how often admission may trigger an idle sweep
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_secs = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX).max(1);
        self
    }

    /// Check and record in one operation
    ///
    /// Runs inside the key's shard lock: either every configured window is
    /// incremented or, on denial, none is.
    pub fn check_and_record(&self, key_id: ApiKeyId, limits: &RateLimits) -> Admission {
        if limits.is_unlimited() {
            return Admission::Admitted;
        }

        let now = self.clock.unix_secs();

        // Sweep before taking the entry lock; retain needs every shard.
        self.maybe_cleanup(now);

        let mut counter = self
            .counters
            .entry(key_id)
            .or_insert_with(|| Counter::new(now));
        counter.last_seen = now;

        let mut denied: Option<(RateWindow, u64)> = None;

        for window in RateWindow::ALL {
            let slot = counter.slot_mut(window);
            slot.roll(window.index_at(now));

            let Some(limit) = window.limit_in(limits) else {
                continue;
            };

            if slot.count >= limit {
                let retry_after = window.secs_until_next(now);
                if denied.is_none_or(|(_, current)| retry_after > current) {
                    denied = Some((window, retry_after));
                }
            }
        }

        if let Some((window, retry_after)) = denied {
            debug!(
                api_key_id = %key_id,
                window = %window,
                retry_after = retry_after,
                "Rate limit exceeded"
            );
            return Admission::Denied {
                window,
                retry_after: Duration::from_secs(retry_after),
            };
        }

        for window in RateWindow::ALL {
            if window.limit_in(limits).is_some() {
                counter.slot_mut(window).count += 1;
            }
        }

        Admission::Admitted
    }

    /// Forget a key's counters
    pub fn reset_key(&self, key_id: ApiKeyId) {
        self.counters.remove(&key_id);
    }

    /// Remove counters idle for longer than the hour window
    pub fn evict_idle_at(&self, now: i64) -> usize {
        let before = self.counters.len();

        self.counters
            .retain(|_, counter| now - counter.last_seen <= IDLE_TTL_SECS);

        let evicted = before.saturating_sub(self.counters.len());
        if evicted > 0 {
            debug!(
                evicted = evicted,
                remaining = self.counters.len(),
                "Evicted idle rate limit counters"
            );
        }
        evicted
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    fn maybe_cleanup(&self, now: i64) {
        let last = self.last_cleanup.load(Ordering::Relaxed);
        if now - last < self.cleanup_interval_secs {
            return;
        }

        // Only the caller that wins the swap sweeps.
        if self
            .last_cleanup
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.evict_idle_at(now);
        }
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimiter {
    async fn admit(&self, key_id: ApiKeyId, limits: &RateLimits) -> Result<Admission, DomainError> {
        Ok(self.check_and_record(key_id, limits))
    }

    async fn reset(&self, key_id: ApiKeyId) -> Result<(), DomainError> {
        self.reset_key(key_id);
        Ok(())
    }

    async fn evict_idle(&self) -> Result<usize, DomainError> {
        Ok(self.evict_idle_at(self.clock.unix_secs()))
    }
}

/// Spawn a background task that evicts idle counters every `interval`
pub fn spawn_sweeper(store: Arc<dyn RateLimitStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = store.evict_idle().await {
                warn!(error = %e, "Rate limit counter sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rate_limit::ManualClock;

    // Aligned to an hour boundary so window arithmetic is easy to follow.
    const START: i64 = 1_700_002_800;

    fn limiter_at(start: i64) -> (Arc<ManualClock>, InMemoryRateLimiter) {
        let clock = Arc::new(ManualClock::at_unix(start));
        let limiter = InMemoryRateLimiter::with_clock(clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_start_is_hour_aligned() {
        assert_eq!(START % 3600, 0);
    }

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let (_clock, limiter) = limiter_at(START);
        let limits = RateLimits::unlimited().with_per_minute(3);
        let key = ApiKeyId::new(1);

        for _ in 0..3 {
            assert!(limiter.check_and_record(key, &limits).is_admitted());
        }

        let denied = limiter.check_and_record(key, &limits);
        assert_eq!(
            denied,
            Admission::Denied {
                window: RateWindow::Minute,
                retry_after: Duration::from_secs(60),
            }
        );
    }

    #[test]
    fn test_new_minute_window_admits_again() {
        let (clock, limiter) = limiter_at(START + 30);
        let limits = RateLimits::unlimited().with_per_minute(2);
        let key = ApiKeyId::new(1);

        assert!(limiter.check_and_record(key, &limits).is_admitted());
        assert!(limiter.check_and_record(key, &limits).is_admitted());

        let denied = limiter.check_and_record(key, &limits);
        assert_eq!(denied.retry_after_secs(), 30);

        clock.advance(Duration::from_secs(29));
        assert!(!limiter.check_and_record(key, &limits).is_admitted());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check_and_record(key, &limits).is_admitted());
    }

    #[test]
    fn test_hour_limit_spans_minutes() {
        let (clock, limiter) = limiter_at(START);
        let limits = RateLimits::unlimited().with_per_minute(2).with_per_hour(3);
        let key = ApiKeyId::new(1);

        assert!(limiter.check_and_record(key, &limits).is_admitted());
        assert!(limiter.check_and_record(key, &limits).is_admitted());

        clock.advance(Duration::from_secs(60));
        assert!(limiter.check_and_record(key, &limits).is_admitted());

        let denied = limiter.check_and_record(key, &limits);
        assert_eq!(
            denied,
            Admission::Denied {
                window: RateWindow::Hour,
                retry_after: Duration::from_secs(3540),
            }
        );

        clock.advance(Duration::from_secs(3540));
        assert!(limiter.check_and_record(key, &limits).is_admitted());
    }

    #[test]
    fn test_denial_does_not_consume_budget() {
        let (clock, limiter) = limiter_at(START);
        let limits = RateLimits::unlimited().with_per_minute(1).with_per_hour(2);
        let key = ApiKeyId::new(1);

        assert!(limiter.check_and_record(key, &limits).is_admitted());

        // Denied on the minute window many times; the hour count must not move.
        for _ in 0..10 {
            assert!(!limiter.check_and_record(key, &limits).is_admitted());
        }

        clock.advance(Duration::from_secs(60));
        assert!(limiter.check_and_record(key, &limits).is_admitted());

        clock.advance(Duration::from_secs(60));
        assert_eq!(
            limiter.check_and_record(key, &limits),
            Admission::Denied {
                window: RateWindow::Hour,
                retry_after: Duration::from_secs(3480),
            }
        );
    }

    #[test]
    fn test_keys_are_isolated() {
        let (_clock, limiter) = limiter_at(START);
        let limits = RateLimits::unlimited().with_per_minute(1);

        assert!(limiter.check_and_record(ApiKeyId::new(1), &limits).is_admitted());
        assert!(!limiter.check_and_record(ApiKeyId::new(1), &limits).is_admitted());

        assert!(limiter.check_and_record(ApiKeyId::new(2), &limits).is_admitted());
    }

    #[test]
    fn test_unlimited_is_not_tracked() {
        let (_clock, limiter) = limiter_at(START);

        for _ in 0..1000 {
            assert!(limiter
                .check_and_record(ApiKeyId::new(1), &RateLimits::unlimited())
                .is_admitted());
        }

        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_unset_window_is_not_counted() {
        let (clock, limiter) = limiter_at(START);
        let key = ApiKeyId::new(1);

        let minute_only = RateLimits::unlimited().with_per_minute(5);
        for _ in 0..5 {
            assert!(limiter.check_and_record(key, &minute_only).is_admitted());
        }

        // The hour window was never counted, so a tight hour limit still has room.
        clock.advance(Duration::from_secs(60));
        let with_hour = RateLimits::unlimited().with_per_minute(5).with_per_hour(1);
        assert!(limiter.check_and_record(key, &with_hour).is_admitted());
        assert!(!limiter.check_and_record(key, &with_hour).is_admitted());
    }

    #[test]
    fn test_reset_clears_counters() {
        let (_clock, limiter) = limiter_at(START);
        let limits = RateLimits::unlimited().with_per_minute(1);
        let key = ApiKeyId::new(1);

        assert!(limiter.check_and_record(key, &limits).is_admitted());
        assert!(!limiter.check_and_record(key, &limits).is_admitted());

        limiter.reset_key(key);
        assert!(limiter.check_and_record(key, &limits).is_admitted());
    }

    #[test]
    fn test_evict_idle() {
        let (clock, limiter) = limiter_at(START);
        let limits = RateLimits::unlimited().with_per_minute(10);

        limiter.check_and_record(ApiKeyId::new(1), &limits);
        clock.advance(Duration::from_secs(1800));
        limiter.check_and_record(ApiKeyId::new(2), &limits);

        assert_eq!(limiter.evict_idle_at(START + 3600), 0);
        assert_eq!(limiter.evict_idle_at(START + 3601), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_opportunistic_cleanup() {
        let clock = Arc::new(ManualClock::at_unix(START));
        let limiter = InMemoryRateLimiter::with_clock(clock.clone())
            .with_cleanup_interval(Duration::from_secs(300));
        let limits = RateLimits::unlimited().with_per_minute(10);

        limiter.check_and_record(ApiKeyId::new(1), &limits);

        clock.advance(Duration::from_secs(4000));
        limiter.check_and_record(ApiKeyId::new(2), &limits);

        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission_never_exceeds_limit() {
        const N: u32 = 50;

        let limiter = Arc::new(InMemoryRateLimiter::with_clock(Arc::new(
            ManualClock::at_unix(START),
        )));
        let limits = RateLimits::unlimited().with_per_minute(N);
        let key = ApiKeyId::new(7);

        let handles = (0..(2 * N)).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.admit(key, &limits).await.unwrap().is_admitted() })
        });

        let admitted = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|result| *result.as_ref().unwrap())
            .count();

        assert_eq!(admitted, N as usize);
    }

    #[tokio::test]
    async fn test_store_trait_roundtrip() {
        let store: Arc<dyn RateLimitStore> = Arc::new(InMemoryRateLimiter::with_clock(Arc::new(
            ManualClock::at_unix(START),
        )));
        let limits = RateLimits::unlimited().with_per_minute(1);

        assert!(store.admit(ApiKeyId::new(1), &limits).await.unwrap().is_admitted());
        assert!(!store.admit(ApiKeyId::new(1), &limits).await.unwrap().is_admitted());

        store.reset(ApiKeyId::new(1)).await.unwrap();
        assert!(store.admit(ApiKeyId::new(1), &limits).await.unwrap().is_admitted());
        assert_eq!(store.evict_idle().await.unwrap(), 0);
    }
}
