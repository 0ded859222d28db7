//! API Key service
//!
//! Issues, updates and revokes agent keys. Keys are never deleted; revoked
//! records remain for audit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::api_key::{
    parse_rate_limit, validate_expiry, validate_key_name, ApiKey, ApiKeyId, ApiKeyRepository,
    NewApiKey, PermissionScope, RateLimits,
};
use crate::domain::rate_limit::{Clock, RateLimitStore, RateWindow, SystemClock};
use crate::domain::DomainError;

use super::generator::ApiKeyGenerator;
use super::hasher::KeyHasher;

/// Input for issuing a key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueApiKeyRequest {
    pub agent_id: i64,
    pub company_id: i64,
    pub key_name: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// `None` issues a master key
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub rate_limit_per_minute: Option<i64>,
    #[serde(default)]
    pub rate_limit_per_hour: Option<i64>,
    #[serde(default)]
    pub created_by_user_id: Option<i64>,
}

impl IssueApiKeyRequest {
    pub fn new(agent_id: i64, company_id: i64, key_name: impl Into<String>) -> Self {
        Self {
            agent_id,
            company_id,
            key_name: key_name.into(),
            ..Default::default()
        }
    }
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiKeyRequest {
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub permissions: Option<PermissionScope>,
    #[serde(default)]
    pub rate_limit_per_minute: Option<i64>,
    #[serde(default)]
    pub rate_limit_per_hour: Option<i64>,
}

/// Result of issuing a new API key
#[derive(Debug)]
pub struct IssuedApiKey {
    /// The API key entity (without the secret)
    pub api_key: ApiKey,
    /// The full secret key (only returned once)
    pub secret: String,
}

/// API Key service for managing agent keys
#[derive(Debug, Clone)]
pub struct ApiKeyService {
    repository: Arc<dyn ApiKeyRepository>,
    hasher: Arc<dyn KeyHasher>,
    rate_limiter: Arc<dyn RateLimitStore>,
    generator: ApiKeyGenerator,
    clock: Arc<dyn Clock>,
}

impl ApiKeyService {
    /// Create a new API key service
    pub fn new(
        repository: Arc<dyn ApiKeyRepository>,
        hasher: Arc<dyn KeyHasher>,
        rate_limiter: Arc<dyn RateLimitStore>,
    ) -> Self {
        Self {
            repository,
            hasher,
            rate_limiter,
            generator: ApiKeyGenerator::live(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Issue a new key with a freshly generated secret
    pub async fn issue(&self, request: IssueApiKeyRequest) -> Result<IssuedApiKey, DomainError> {
        let generated = self.generator.generate();
        self.store_new_key(request, generated.secret, generated.prefix)
            .await
    }

    /// Issue a key for a secret chosen out of band (bootstrap and seeding)
    pub async fn issue_with_secret(
        &self,
        request: IssueApiKeyRequest,
        secret: &str,
    ) -> Result<IssuedApiKey, DomainError> {
        let prefix = ApiKeyGenerator::extract_prefix(secret)
            .ok_or_else(|| DomainError::validation("Invalid API key format"))?
            .to_string();

        self.store_new_key(request, secret.to_string(), prefix).await
    }

    async fn store_new_key(
        &self,
        request: IssueApiKeyRequest,
        secret: String,
        prefix: String,
    ) -> Result<IssuedApiKey, DomainError> {
        validate_key_name(&request.key_name)?;
        validate_expiry(request.expires_at, self.clock.now())?;

        let rate_limits = RateLimits::new(
            parse_rate_limit(request.rate_limit_per_minute, RateWindow::Minute)?,
            parse_rate_limit(request.rate_limit_per_hour, RateWindow::Hour)?,
        );

        let permissions = PermissionScope::from_optional(request.permissions);

        if permissions.is_master() {
            warn!(
                agent_id = request.agent_id,
                company_id = request.company_id,
                key_prefix = %prefix,
                "Issuing master API key with unrestricted permissions"
            );
        }

        let secret_hash = self.hasher.hash(&secret)?;

        let api_key = self
            .repository
            .create(NewApiKey {
                agent_id: request.agent_id,
                company_id: request.company_id,
                key_name: request.key_name.trim().to_string(),
                secret_hash,
                key_prefix: prefix,
                permissions,
                rate_limits,
                expires_at: request.expires_at,
                created_by_user_id: request.created_by_user_id,
            })
            .await?;

        info!(
            api_key_id = %api_key.id(),
            agent_id = api_key.agent_id(),
            company_id = api_key.company_id(),
            key_prefix = %api_key.key_prefix(),
            "API key issued"
        );

        Ok(IssuedApiKey { api_key, secret })
    }

    /// Get an API key by ID
    pub async fn get(&self, id: ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        self.repository.get(id).await
    }

    /// List an agent's keys within a company
    pub async fn list_by_agent(
        &self,
        agent_id: i64,
        company_id: i64,
    ) -> Result<Vec<ApiKey>, DomainError> {
        self.repository.list_by_agent(agent_id, company_id).await
    }

    /// Apply a partial update to a key owned by `company_id`
    pub async fn update(
        &self,
        id: ApiKeyId,
        company_id: i64,
        request: UpdateApiKeyRequest,
    ) -> Result<ApiKey, DomainError> {
        info!(api_key_id = %id, "Updating API key");

        let mut key = self.get_owned(id, company_id).await?;
        let now = self.clock.now();

        if let Some(name) = request.key_name {
            validate_key_name(&name)?;
            key.set_key_name(name.trim(), now);
        }

        if let Some(is_active) = request.is_active {
            key.set_active(is_active, now);
        }

        if let Some(expires_at) = request.expires_at {
            validate_expiry(Some(expires_at), now)?;
            key.set_expiration(Some(expires_at), now);
        }

        if let Some(permissions) = request.permissions {
            if permissions.is_master() && !key.permissions().is_master() {
                warn!(api_key_id = %id, "API key widened to unrestricted permissions");
            }
            key.set_permissions(permissions, now);
        }

        let mut limits = *key.rate_limits();
        if request.rate_limit_per_minute.is_some() {
            limits.per_minute = parse_rate_limit(request.rate_limit_per_minute, RateWindow::Minute)?;
        }
        if request.rate_limit_per_hour.is_some() {
            limits.per_hour = parse_rate_limit(request.rate_limit_per_hour, RateWindow::Hour)?;
        }

        let limits_changed = limits != *key.rate_limits();
        if limits_changed {
            key.set_rate_limits(limits, now);
        }

        let updated = self.repository.update(&key).await?;

        if limits_changed {
            self.reset_counters(id).await;
        }

        Ok(updated)
    }

    /// Soft-revoke a key owned by `company_id`
    pub async fn revoke(&self, id: ApiKeyId, company_id: i64) -> Result<ApiKey, DomainError> {
        info!(api_key_id = %id, "Revoking API key");

        let mut key = self.get_owned(id, company_id).await?;

        if key.revoked_at().is_none() {
            key.revoke(self.clock.now());
        }

        let revoked = self.repository.update(&key).await?;
        self.reset_counters(id).await;

        Ok(revoked)
    }

    /// Keys of other companies are reported as missing
    async fn get_owned(&self, id: ApiKeyId, company_id: i64) -> Result<ApiKey, DomainError> {
        self.repository
            .get(id)
            .await?
            .filter(|k| k.company_id() == company_id)
            .ok_or_else(|| DomainError::not_found(format!("API key '{}' not found", id)))
    }

    async fn reset_counters(&self, id: ApiKeyId) {
        if let Err(e) = self.rate_limiter.reset(id).await {
            warn!(api_key_id = %id, error = %e, "Failed to reset rate limit counters");
        }
    }
}
