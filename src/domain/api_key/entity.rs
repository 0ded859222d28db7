//! API Key entity and related types

use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::permission::PermissionScope;

/// API Key identifier, assigned by the key store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyId(i64);

impl ApiKeyId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ApiKeyId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a key at a given instant
///
/// Computed from `is_active`, `revoked_at` and `expires_at`; never stored.
/// When several disqualifying conditions hold, `Revoked` wins over
/// `Inactive`, which wins over `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Usable,
    Expired,
    Revoked,
    Inactive,
}

impl KeyState {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Usable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usable => "usable",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-key request budgets; `None` means unlimited for that window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<NonZeroU32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<NonZeroU32>,
}

impl RateLimits {
    /// No limit on either window
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn new(per_minute: Option<NonZeroU32>, per_hour: Option<NonZeroU32>) -> Self {
        Self {
            per_minute,
            per_hour,
        }
    }

    /// Set the per-minute budget (0 clears it)
    pub fn with_per_minute(mut self, limit: u32) -> Self {
        self.per_minute = NonZeroU32::new(limit);
        self
    }

    /// Set the per-hour budget (0 clears it)
    pub fn with_per_hour(mut self, limit: u32) -> Self {
        self.per_hour = NonZeroU32::new(limit);
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.per_minute.is_none() && self.per_hour.is_none()
    }
}

/// An issued key before the store has assigned it an id
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub agent_id: i64,
    pub company_id: i64,
    pub key_name: String,
    pub secret_hash: String,
    pub key_prefix: String,
    pub permissions: PermissionScope,
    pub rate_limits: RateLimits,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by_user_id: Option<i64>,
}

impl NewApiKey {
    /// Materialize the key with the id chosen by the store
    pub fn into_api_key(self, id: ApiKeyId) -> ApiKey {
        let mut key = ApiKey::new(
            id,
            self.agent_id,
            self.company_id,
            self.key_name,
            self.secret_hash,
            self.key_prefix,
        )
        .with_permissions(self.permissions)
        .with_rate_limits(self.rate_limits);

        key.expires_at = self.expires_at;
        key.created_by_user_id = self.created_by_user_id;
        key
    }
}

/// API Key entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    id: ApiKeyId,
    agent_id: i64,
    company_id: i64,
    key_name: String,
    /// Self-describing one-way hash of the full secret. Never exposed in
    /// responses and never logged.
    #[serde(skip_serializing)]
    secret_hash: String,
    /// Non-secret leading fragment of the plaintext, used for lookup and display
    key_prefix: String,
    permissions: PermissionScope,
    #[serde(default)]
    rate_limits: RateLimits,
    is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_by_user_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// Create a new, active key with full permissions and no rate limits
    pub fn new(
        id: ApiKeyId,
        agent_id: i64,
        company_id: i64,
        key_name: impl Into<String>,
        secret_hash: impl Into<String>,
        key_prefix: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id,
            agent_id,
            company_id,
            key_name: key_name.into(),
            secret_hash: secret_hash.into(),
            key_prefix: key_prefix.into(),
            permissions: PermissionScope::All,
            rate_limits: RateLimits::unlimited(),
            is_active: true,
            expires_at: None,
            revoked_at: None,
            last_used_at: None,
            created_by_user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_permissions(mut self, permissions: PermissionScope) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimits) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn with_revoked_at(mut self, revoked_at: Option<DateTime<Utc>>) -> Self {
        self.revoked_at = revoked_at;
        self
    }

    pub fn with_last_used_at(mut self, last_used_at: Option<DateTime<Utc>>) -> Self {
        self.last_used_at = last_used_at;
        self
    }

    pub fn with_created_by(mut self, user_id: i64) -> Self {
        self.created_by_user_id = Some(user_id);
        self
    }

    /// Restore persisted creation/update timestamps
    pub fn with_timestamps(mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    // Getters

    pub fn id(&self) -> ApiKeyId {
        self.id
    }

    pub fn agent_id(&self) -> i64 {
        self.agent_id
    }

    pub fn company_id(&self) -> i64 {
        self.company_id
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn secret_hash(&self) -> &str {
        &self.secret_hash
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn permissions(&self) -> &PermissionScope {
        &self.permissions
    }

    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.last_used_at
    }

    pub fn created_by_user_id(&self) -> Option<i64> {
        self.created_by_user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // Status checks

    /// Lifecycle state at `now`
    pub fn state_at(&self, now: DateTime<Utc>) -> KeyState {
        if self.revoked_at.is_some() {
            return KeyState::Revoked;
        }

        if !self.is_active {
            return KeyState::Inactive;
        }

        match self.expires_at {
            Some(expires_at) if expires_at <= now => KeyState::Expired,
            _ => KeyState::Usable,
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now).is_usable()
    }

    pub fn is_usable(&self) -> bool {
        self.is_usable_at(Utc::now())
    }

    // Mutators stamp `updated_at` with the caller's clock

    pub fn set_key_name(&mut self, key_name: impl Into<String>, at: DateTime<Utc>) {
        self.key_name = key_name.into();
        self.updated_at = at;
    }

    pub fn set_active(&mut self, is_active: bool, at: DateTime<Utc>) {
        self.is_active = is_active;
        self.updated_at = at;
    }

    pub fn set_expiration(&mut self, expires_at: Option<DateTime<Utc>>, at: DateTime<Utc>) {
        self.expires_at = expires_at;
        self.updated_at = at;
    }

    pub fn set_permissions(&mut self, permissions: PermissionScope, at: DateTime<Utc>) {
        self.permissions = permissions;
        self.updated_at = at;
    }

    pub fn set_rate_limits(&mut self, rate_limits: RateLimits, at: DateTime<Utc>) {
        self.rate_limits = rate_limits;
        self.updated_at = at;
    }

    /// Record a successful authentication at `at`
    pub fn record_usage(&mut self, at: DateTime<Utc>) {
        self.last_used_at = Some(at);
    }

    /// Soft-revoke: the record stays for audit but can never authenticate again
    pub fn revoke(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.revoked_at = Some(at);
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_api_key(id: i64) -> ApiKey {
        ApiKey::new(ApiKeyId::new(id), 7, 3, "Test Key", "hashed_secret", "sk_live_abcdefgh")
    }

    #[test]
    fn test_new_key_defaults() {
        let key = create_test_api_key(1);

        assert_eq!(key.id().value(), 1);
        assert_eq!(key.agent_id(), 7);
        assert_eq!(key.company_id(), 3);
        assert!(key.is_active());
        assert!(key.permissions().is_master());
        assert!(key.rate_limits().is_unlimited());
        assert!(key.is_usable());
    }

    #[test]
    fn test_state_usable_with_future_expiry() {
        let now = Utc::now();
        let key = create_test_api_key(1).with_expiration(now + Duration::hours(1));

        assert_eq!(key.state_at(now), KeyState::Usable);
    }

    #[test]
    fn test_state_expired_at_exact_boundary() {
        let now = Utc::now();
        let key = create_test_api_key(1).with_expiration(now);

        assert_eq!(key.state_at(now), KeyState::Expired);
        assert_eq!(key.state_at(now - Duration::seconds(1)), KeyState::Usable);
    }

    #[test]
    fn test_state_inactive() {
        let key = create_test_api_key(1).with_active(false);
        assert_eq!(key.state_at(Utc::now()), KeyState::Inactive);
    }

    #[test]
    fn test_state_precedence() {
        let now = Utc::now();
        let key = create_test_api_key(1)
            .with_active(false)
            .with_expiration(now - Duration::hours(1))
            .with_revoked_at(Some(now));

        assert_eq!(key.state_at(now), KeyState::Revoked);

        let key = create_test_api_key(2)
            .with_active(false)
            .with_expiration(now - Duration::hours(1));

        assert_eq!(key.state_at(now), KeyState::Inactive);
    }

    #[test]
    fn test_revoke_is_soft() {
        let mut key = create_test_api_key(1);
        let at = Utc::now();

        key.revoke(at);

        assert!(!key.is_active());
        assert_eq!(key.revoked_at(), Some(at));
        assert_eq!(key.state_at(at), KeyState::Revoked);
        assert_eq!(key.key_prefix(), "sk_live_abcdefgh");
    }

    #[test]
    fn test_setters_stamp_given_time() {
        let mut key = create_test_api_key(1);
        let at = key.created_at() + Duration::days(30);

        key.set_key_name("Renamed", at);
        assert_eq!(key.updated_at(), at);

        let later = at + Duration::minutes(5);
        key.set_rate_limits(RateLimits::unlimited().with_per_minute(10), later);
        assert_eq!(key.updated_at(), later);

        key.set_active(false, later + Duration::seconds(1));
        assert_eq!(key.updated_at(), later + Duration::seconds(1));
        assert_eq!(key.state_at(later), KeyState::Inactive);
    }

    #[test]
    fn test_record_usage() {
        let mut key = create_test_api_key(1);
        assert!(key.last_used_at().is_none());

        let at = Utc::now();
        key.record_usage(at);
        assert_eq!(key.last_used_at(), Some(at));
    }

    #[test]
    fn test_rate_limits_builders() {
        let limits = RateLimits::unlimited().with_per_minute(2).with_per_hour(100);

        assert_eq!(limits.per_minute.map(NonZeroU32::get), Some(2));
        assert_eq!(limits.per_hour.map(NonZeroU32::get), Some(100));
        assert!(!limits.is_unlimited());
        assert!(RateLimits::unlimited().with_per_minute(0).is_unlimited());
    }

    #[test]
    fn test_secret_hash_not_serialized() {
        let key = create_test_api_key(1);
        let json = serde_json::to_string(&key).unwrap();

        assert!(!json.contains("hashed_secret"));
        assert!(json.contains("sk_live_abcdefgh"));
    }

    #[test]
    fn test_new_api_key_into_api_key() {
        let draft = NewApiKey {
            agent_id: 11,
            company_id: 22,
            key_name: "Draft".to_string(),
            secret_hash: "h".to_string(),
            key_prefix: "sk_live_12345678".to_string(),
            permissions: PermissionScope::subset(["contacts:read"]),
            rate_limits: RateLimits::unlimited().with_per_minute(5),
            expires_at: None,
            created_by_user_id: Some(9),
        };

        let key = draft.into_api_key(ApiKeyId::new(99));

        assert_eq!(key.id(), ApiKeyId::new(99));
        assert_eq!(key.agent_id(), 11);
        assert_eq!(key.created_by_user_id(), Some(9));
        assert!(key.permissions().allows("contacts:read"));
        assert!(key.is_active());
    }
}
