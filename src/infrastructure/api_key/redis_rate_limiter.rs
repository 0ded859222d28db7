//! Redis-backed rate limiter
//!
//! Shares budgets between gateway instances. Each admission runs one Lua
//! script that reads both window counters and either increments both or
//! neither, so the check-and-increment stays atomic across processes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use crate::domain::api_key::{ApiKeyId, RateLimits};
use crate::domain::rate_limit::{Admission, Clock, RateLimitStore, RateWindow, SystemClock};
use crate::domain::DomainError;

const ADMIT_SCRIPT: &str = r#"
local minute_limit = tonumber(ARGV[1])
local hour_limit = tonumber(ARGV[2])

if hour_limit > 0 then
  local used = tonumber(redis.call('GET', KEYS[2]) or '0')
  if used >= hour_limit then
    return 2
  end
end

if minute_limit > 0 then
  local used = tonumber(redis.call('GET', KEYS[1]) or '0')
  if used >= minute_limit then
    return 1
  end
end

if minute_limit > 0 then
  redis.call('INCR', KEYS[1])
  redis.call('EXPIRE', KEYS[1], ARGV[3])
end

if hour_limit > 0 then
  redis.call('INCR', KEYS[2])
  redis.call('EXPIRE', KEYS[2], ARGV[4])
end

return 0
"#;

/// Rate limiter storing window counters in Redis
#[derive(Clone)]
pub struct RedisRateLimiter {
    connection: ConnectionManager,
    script: Arc<Script>,
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRateLimiter")
            .field("key_prefix", &self.key_prefix)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisRateLimiter {
    /// Connect to Redis at `url`
    pub async fn connect(url: &str) -> Result<Self, DomainError> {
        let client = Client::open(url)
            .map_err(|e| DomainError::cache(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            connection,
            script: Arc::new(Script::new(ADMIT_SCRIPT)),
            key_prefix: "agent_rl".to_string(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Namespace all counter keys under `prefix`
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn window_key(&self, key_id: ApiKeyId, window: RateWindow, now: i64) -> String {
        window_key(&self.key_prefix, key_id, window, now)
    }
}

/// Counter key for one window; the braces keep both windows of a key in
/// the same cluster slot
fn window_key(prefix: &str, key_id: ApiKeyId, window: RateWindow, now: i64) -> String {
    format!(
        "{}:{{{}}}:{}:{}",
        prefix,
        key_id,
        window.as_str(),
        window.index_at(now)
    )
}

/// Map the script's return code to an admission decision
fn decode_admission(code: i64, now: i64) -> Result<Admission, DomainError> {
    let window = match code {
        0 => return Ok(Admission::Admitted),
        1 => RateWindow::Minute,
        2 => RateWindow::Hour,
        other => {
            return Err(DomainError::cache(format!(
                "Unexpected rate limit script result: {}",
                other
            )))
        }
    };

    Ok(Admission::Denied {
        window,
        retry_after: Duration::from_secs(window.secs_until_next(now)),
    })
}

#[async_trait]
impl RateLimitStore for RedisRateLimiter {
    async fn admit(&self, key_id: ApiKeyId, limits: &RateLimits) -> Result<Admission, DomainError> {
        if limits.is_unlimited() {
            return Ok(Admission::Admitted);
        }

        let now = self.clock.unix_secs();
        let mut conn = self.connection.clone();

        let code: i64 = self
            .script
            .key(self.window_key(key_id, RateWindow::Minute, now))
            .key(self.window_key(key_id, RateWindow::Hour, now))
            .arg(RateWindow::Minute.limit_in(limits).unwrap_or(0))
            .arg(RateWindow::Hour.limit_in(limits).unwrap_or(0))
            .arg(RateWindow::Minute.duration_secs() * 2)
            .arg(RateWindow::Hour.duration_secs() * 2)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DomainError::cache(format!("Rate limit script failed: {}", e)))?;

        decode_admission(code, now)
    }

    async fn reset(&self, key_id: ApiKeyId) -> Result<(), DomainError> {
        let now = self.clock.unix_secs();
        let mut conn = self.connection.clone();

        let keys = vec![
            self.window_key(key_id, RateWindow::Minute, now),
            self.window_key(key_id, RateWindow::Hour, now),
        ];

        let _: () = conn.del(keys).await.map_err(|e| {
            DomainError::cache(format!("Failed to reset rate limit for key '{}': {}", key_id, e))
        })?;

        Ok(())
    }

    // Redis expires counters on its own, so `evict_idle` keeps the default no-op.
}
