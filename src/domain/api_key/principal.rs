//! Authenticated agent identity

use serde::Serialize;

use super::entity::{ApiKey, ApiKeyId, RateLimits};
use super::permission::PermissionScope;

/// Resolved identity of a successfully authenticated request
///
/// Attached to the request for downstream handlers. Carries no secret
/// material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    key_id: ApiKeyId,
    agent_id: i64,
    company_id: i64,
    permissions: PermissionScope,
    #[serde(skip)]
    rate_limits: RateLimits,
}

impl Principal {
    pub fn new(
        key_id: ApiKeyId,
        agent_id: i64,
        company_id: i64,
        permissions: PermissionScope,
        rate_limits: RateLimits,
    ) -> Self {
        Self {
            key_id,
            agent_id,
            company_id,
            permissions,
            rate_limits,
        }
    }

    pub fn key_id(&self) -> ApiKeyId {
        self.key_id
    }

    pub fn agent_id(&self) -> i64 {
        self.agent_id
    }

    pub fn company_id(&self) -> i64 {
        self.company_id
    }

    pub fn permissions(&self) -> &PermissionScope {
        &self.permissions
    }

    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    pub fn is_master(&self) -> bool {
        self.permissions.is_master()
    }

    /// Whether this principal may perform `permission`
    pub fn can(&self, permission: &str) -> bool {
        self.permissions.allows(permission)
    }
}

impl From<&ApiKey> for Principal {
    fn from(key: &ApiKey) -> Self {
        Self::new(
            key.id(),
            key.agent_id(),
            key.company_id(),
            key.permissions().clone(),
            *key.rate_limits(),
        )
    }
}
