//! Rate limit domain - per-key admission control over fixed windows

mod clock;

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::api_key::{ApiKeyId, RateLimits};
use crate::domain::DomainError;

pub use clock::{Clock, SystemClock};
#[cfg(test)]
pub use clock::ManualClock;

/// A fixed, epoch-aligned counting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateWindow {
    Minute,
    Hour,
}

impl RateWindow {
    pub const ALL: [RateWindow; 2] = [RateWindow::Minute, RateWindow::Hour];

    /// Window length in seconds
    pub fn duration_secs(&self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3600,
        }
    }

    /// Index of the window containing `unix_secs`
    pub fn index_at(&self, unix_secs: i64) -> i64 {
        unix_secs.div_euclid(self.duration_secs())
    }

    /// Seconds from `unix_secs` until the next window starts (at least 1)
    pub fn secs_until_next(&self, unix_secs: i64) -> u64 {
        let len = self.duration_secs();
        let remaining = len - unix_secs.rem_euclid(len);
        remaining.max(1) as u64
    }

    /// Budget configured for this window, if any
    pub fn limit_in(&self, limits: &RateLimits) -> Option<u32> {
        match self {
            Self::Minute => limits.per_minute.map(|n| n.get()),
            Self::Hour => limits.per_hour.map(|n| n.get()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }
}

impl std::fmt::Display for RateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied {
        window: RateWindow,
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }

    /// Whole seconds the caller should wait; zero when admitted
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Self::Admitted => 0,
            Self::Denied { retry_after, .. } => retry_after.as_secs().max(1),
        }
    }
}

/// Counter store backing the rate limiter
///
/// `admit` is a single check-and-increment: when any configured window is
/// already at its limit the request is denied and no counter moves.
#[async_trait]
pub trait RateLimitStore: Send + Sync + Debug {
    /// Try to admit one request for `key_id` under `limits`
    async fn admit(&self, key_id: ApiKeyId, limits: &RateLimits) -> Result<Admission, DomainError>;

    /// Forget all counters for `key_id`
    async fn reset(&self, key_id: ApiKeyId) -> Result<(), DomainError>;

    /// Drop counters idle for longer than the hour window; returns how many went
    async fn evict_idle(&self) -> Result<usize, DomainError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_index_alignment() {
        assert_eq!(RateWindow::Minute.index_at(0), 0);
        assert_eq!(RateWindow::Minute.index_at(59), 0);
        assert_eq!(RateWindow::Minute.index_at(60), 1);
        assert_eq!(RateWindow::Hour.index_at(3599), 0);
        assert_eq!(RateWindow::Hour.index_at(3600), 1);
    }

    #[test]
    fn test_secs_until_next() {
        assert_eq!(RateWindow::Minute.secs_until_next(0), 60);
        assert_eq!(RateWindow::Minute.secs_until_next(59), 1);
        assert_eq!(RateWindow::Minute.secs_until_next(125), 55);
        assert_eq!(RateWindow::Hour.secs_until_next(3000), 600);
    }

    #[test]
    fn test_limit_in() {
        let limits = RateLimits::unlimited().with_per_minute(2).with_per_hour(100);

        assert_eq!(RateWindow::Minute.limit_in(&limits), Some(2));
        assert_eq!(RateWindow::Hour.limit_in(&limits), Some(100));
        assert_eq!(RateWindow::Minute.limit_in(&RateLimits::unlimited()), None);
    }

    #[test]
    fn test_admission_retry_after() {
        assert_eq!(Admission::Admitted.retry_after_secs(), 0);

        let denied = Admission::Denied {
            window: RateWindow::Minute,
            retry_after: Duration::from_millis(200),
        };
        assert_eq!(denied.retry_after_secs(), 1);
        assert!(!denied.is_admitted());
    }
}
