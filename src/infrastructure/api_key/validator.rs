//! Presented-secret validation
//!
//! Resolves a raw API key string to a [`Principal`]. Empty or malformed
//! input is rejected before the key store is consulted; the store lookup is
//! bounded by a timeout and any store failure fails closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::domain::api_key::{ApiKeyRepository, AuthError, InvalidReason, KeyState, Principal};
use crate::domain::rate_limit::{Clock, SystemClock};
use crate::infrastructure::observability::record_key_lookup;

use super::generator::ApiKeyGenerator;
use super::hasher::KeyHasher;

/// Default upper bound on a single key store lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(2000);

/// Validates presented API keys against the key store
#[derive(Debug, Clone)]
pub struct ApiKeyValidator {
    repository: Arc<dyn ApiKeyRepository>,
    hasher: Arc<dyn KeyHasher>,
    clock: Arc<dyn Clock>,
    lookup_timeout: Duration,
}

impl ApiKeyValidator {
    pub fn new(repository: Arc<dyn ApiKeyRepository>, hasher: Arc<dyn KeyHasher>) -> Self {
        Self {
            repository,
            hasher,
            clock: Arc::new(SystemClock),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Resolve a presented secret to the principal it was issued for
    pub async fn validate(&self, presented: &str) -> Result<Principal, AuthError> {
        let presented = presented.trim();

        if presented.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let Some(prefix) = ApiKeyGenerator::extract_prefix(presented) else {
            warn!(reason = %InvalidReason::Malformed, "Rejected API key");
            return Err(AuthError::invalid(InvalidReason::Malformed));
        };

        debug!(key_prefix = %prefix, "Validating API key");

        let started = Instant::now();
        let lookup =
            tokio::time::timeout(self.lookup_timeout, self.repository.find_by_prefix(prefix)).await;
        record_key_lookup(started.elapsed());

        let found = match lookup {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                error!(key_prefix = %prefix, error = %e, "API key lookup failed");
                return Err(AuthError::unavailable(e.to_string()));
            }
            Err(_) => {
                error!(
                    key_prefix = %prefix,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "API key lookup timed out"
                );
                return Err(AuthError::unavailable("API key lookup timed out"));
            }
        };

        let Some(api_key) = found else {
            return Err(reject(prefix, InvalidReason::NotFound));
        };

        if !self.hasher.verify(presented, api_key.secret_hash()) {
            return Err(reject(prefix, InvalidReason::HashMismatch));
        }

        let now = self.clock.now();

        let reason = match api_key.state_at(now) {
            KeyState::Usable => None,
            KeyState::Revoked => Some(InvalidReason::Revoked),
            KeyState::Inactive => Some(InvalidReason::Inactive),
            KeyState::Expired => Some(InvalidReason::Expired),
        };

        if let Some(reason) = reason {
            return Err(reject(prefix, reason));
        }

        let repository = self.repository.clone();
        let key_id = api_key.id();
        tokio::spawn(async move {
            if let Err(e) = repository.touch_last_used(key_id, now).await {
                warn!(api_key_id = %key_id, error = %e, "Failed to record API key usage");
            }
        });

        debug!(
            key_prefix = %prefix,
            api_key_id = %key_id,
            agent_id = api_key.agent_id(),
            "API key validated"
        );

        Ok(Principal::from(&api_key))
    }
}

fn reject(prefix: &str, reason: InvalidReason) -> AuthError {
    warn!(key_prefix = %prefix, reason = %reason, "Rejected API key");
    AuthError::invalid(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api_key::mock::MockApiKeyRepository;
    use crate::domain::api_key::{ApiKeyId, NewApiKey, PermissionScope, RateLimits};
    use crate::domain::rate_limit::ManualClock;
    use crate::infrastructure::api_key::hasher::HmacKeyHasher;
    use chrono::{Duration as ChronoDuration, Utc};

    struct Fixture {
        repo: Arc<MockApiKeyRepository>,
        hasher: Arc<HmacKeyHasher>,
        clock: Arc<ManualClock>,
        validator: ApiKeyValidator,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(MockApiKeyRepository::new());
        let hasher = Arc::new(HmacKeyHasher::new("test-pepper").unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let validator = ApiKeyValidator::new(repo.clone(), hasher.clone())
            .with_clock(clock.clone())
            .with_lookup_timeout(Duration::from_millis(100));

        Fixture {
            repo,
            hasher,
            clock,
            validator,
        }
    }

    impl Fixture {
        async fn issue(&self, permissions: PermissionScope) -> (ApiKeyId, String) {
            let generated = ApiKeyGenerator::live().generate();
            let key = self
                .repo
                .create(NewApiKey {
                    agent_id: 7,
                    company_id: 3,
                    key_name: "Agent".to_string(),
                    secret_hash: self.hasher.hash(&generated.secret).unwrap(),
                    key_prefix: generated.prefix,
                    permissions,
                    rate_limits: RateLimits::unlimited().with_per_minute(10),
                    expires_at: None,
                    created_by_user_id: None,
                })
                .await
                .unwrap();

            (key.id(), generated.secret)
        }

        async fn modify(&self, id: ApiKeyId, f: impl FnOnce(&mut crate::domain::ApiKey)) {
            let mut key = self.repo.get(id).await.unwrap().unwrap();
            f(&mut key);
            self.repo.update(&key).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_valid_key_resolves_principal() {
        let fx = fixture();
        let (id, secret) = fx
            .issue(PermissionScope::subset(["contacts:read", "deals:read"]))
            .await;

        let principal = fx.validator.validate(&secret).await.unwrap();

        assert_eq!(principal.key_id(), id);
        assert_eq!(principal.agent_id(), 7);
        assert_eq!(principal.company_id(), 3);
        assert_eq!(
            principal.permissions(),
            &PermissionScope::subset(["contacts:read", "deals:read"])
        );
        assert_eq!(principal.rate_limits().per_minute.map(|n| n.get()), Some(10));
    }

    #[tokio::test]
    async fn test_surrounding_whitespace_is_ignored() {
        let fx = fixture();
        let (_, secret) = fx.issue(PermissionScope::All).await;

        assert!(fx.validator.validate(&format!("  {}  ", secret)).await.is_ok());
    }

    #[tokio::test]
    async fn test_success_touches_last_used() {
        let fx = fixture();
        let (id, secret) = fx.issue(PermissionScope::All).await;

        fx.validator.validate(&secret).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fx.repo.touch_count(), 1);
        let key = fx.repo.get(id).await.unwrap().unwrap();
        assert!(key.last_used_at().is_some());
    }

    #[tokio::test]
    async fn test_empty_and_malformed_skip_lookup() {
        let fx = fixture();

        assert_eq!(
            fx.validator.validate("").await,
            Err(AuthError::MissingCredential)
        );
        assert_eq!(
            fx.validator.validate("   ").await,
            Err(AuthError::MissingCredential)
        );
        assert_eq!(
            fx.validator.validate("abc123").await,
            Err(AuthError::invalid(InvalidReason::Malformed))
        );
        assert_eq!(
            fx.validator.validate("sk_live_short").await,
            Err(AuthError::invalid(InvalidReason::Malformed))
        );

        assert_eq!(fx.repo.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let fx = fixture();

        let result = fx
            .validator
            .validate("sk_live_unknown0000000000000000")
            .await;

        assert_eq!(result, Err(AuthError::invalid(InvalidReason::NotFound)));
        assert_eq!(fx.repo.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_hash_mismatch() {
        let fx = fixture();
        let (_, secret) = fx.issue(PermissionScope::All).await;

        // Same prefix, different tail
        let forged = format!("{}tampered", &secret[..secret.len() - 8]);

        assert_eq!(
            fx.validator.validate(&forged).await,
            Err(AuthError::invalid(InvalidReason::HashMismatch))
        );
    }

    #[tokio::test]
    async fn test_unusable_states_share_external_error() {
        let fx = fixture();

        let (revoked, revoked_secret) = fx.issue(PermissionScope::All).await;
        fx.modify(revoked, |k| k.revoke(Utc::now())).await;

        let (inactive, inactive_secret) = fx.issue(PermissionScope::All).await;
        let now = fx.clock.now();
        fx.modify(inactive, |k| k.set_active(false, now)).await;

        let (expiring, expiring_secret) = fx.issue(PermissionScope::All).await;
        let expires_at = fx.clock.now() + ChronoDuration::seconds(30);
        fx.modify(expiring, |k| k.set_expiration(Some(expires_at), now)).await;

        // Still valid before expiry
        assert!(fx.validator.validate(&expiring_secret).await.is_ok());
        fx.clock.advance(Duration::from_secs(30));

        let errors = [
            fx.validator.validate(&revoked_secret).await.unwrap_err(),
            fx.validator.validate(&inactive_secret).await.unwrap_err(),
            fx.validator.validate(&expiring_secret).await.unwrap_err(),
        ];

        assert_eq!(errors[0], AuthError::invalid(InvalidReason::Revoked));
        assert_eq!(errors[1], AuthError::invalid(InvalidReason::Inactive));
        assert_eq!(errors[2], AuthError::invalid(InvalidReason::Expired));

        for error in &errors {
            assert_eq!(error.public_message(), "Invalid API key");
            assert_eq!(error.outcome(), "invalid_credential");
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let fx = fixture();
        let (_, secret) = fx.issue(PermissionScope::All).await;
        fx.repo.set_should_fail(true).await;

        let result = fx.validator.validate(&secret).await;
        assert!(matches!(result, Err(AuthError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_lookup_timeout_fails_closed() {
        let fx = fixture();
        let (_, secret) = fx.issue(PermissionScope::All).await;
        fx.repo.set_delay(Some(Duration::from_millis(500))).await;

        let result = fx.validator.validate(&secret).await;
        assert!(matches!(result, Err(AuthError::UpstreamUnavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_validation_of_same_key() {
        let fx = fixture();
        let (id, secret) = fx.issue(PermissionScope::All).await;
        let validator = Arc::new(fx.validator.clone());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let validator = validator.clone();
            let secret = secret.clone();
            handles.push(tokio::spawn(async move { validator.validate(&secret).await }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().key_id(), id);
        }
    }
}
