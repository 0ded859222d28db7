//! Application state for shared services

use std::sync::Arc;

use crate::api::middleware::AgentRouteFilter;
use crate::domain::api_key::{ApiKeyRepository, UsageLogRepository};
use crate::domain::rate_limit::RateLimitStore;
use crate::infrastructure::api_key::{AgentGateway, ApiKeyService};

/// Shared state handed to middleware and handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub gateway: Arc<AgentGateway>,
    pub api_key_service: Arc<ApiKeyService>,
    /// Consulted directly by the readiness check
    pub key_store: Arc<dyn ApiKeyRepository>,
    /// Shared with the gateway; swept for idle counters in the background
    pub rate_limiter: Arc<dyn RateLimitStore>,
    /// Written after each authorized agent request
    pub usage_log: Arc<dyn UsageLogRepository>,
    pub agent_routes: AgentRouteFilter,
}

impl AppState {
    pub fn new(
        gateway: AgentGateway,
        api_key_service: ApiKeyService,
        key_store: Arc<dyn ApiKeyRepository>,
        rate_limiter: Arc<dyn RateLimitStore>,
        usage_log: Arc<dyn UsageLogRepository>,
        route_prefix: &str,
    ) -> Self {
        Self {
            gateway: Arc::new(gateway),
            api_key_service: Arc::new(api_key_service),
            key_store,
            rate_limiter,
            usage_log,
            agent_routes: AgentRouteFilter::new(route_prefix),
        }
    }
}
