//! API middleware components

pub mod agent_auth;
pub mod logging;
pub mod metrics;

pub use agent_auth::{
    agent_auth_middleware, extract_credential, AgentPrincipal, AgentRouteFilter,
    CredentialExtractor, CREDENTIAL_EXTRACTORS,
};
pub use logging::logging_middleware;
pub use metrics::metrics_middleware;
