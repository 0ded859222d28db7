//! Agent gateway decision
//!
//! Transport-independent accept/reject for one agent request: validate the
//! presented credential, then spend one unit of the key's rate budget.
//! Nothing is counted unless the credential is valid.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::domain::api_key::{AuthError, Principal};
use crate::domain::rate_limit::{Admission, RateLimitStore};
use crate::infrastructure::observability::record_gateway_decision;

use super::validator::ApiKeyValidator;

/// Orchestrates validation and admission for agent requests
#[derive(Debug, Clone)]
pub struct AgentGateway {
    validator: ApiKeyValidator,
    rate_limiter: Arc<dyn RateLimitStore>,
}

impl AgentGateway {
    pub fn new(validator: ApiKeyValidator, rate_limiter: Arc<dyn RateLimitStore>) -> Self {
        Self {
            validator,
            rate_limiter,
        }
    }

    /// Decide whether a request carrying `credential` may proceed
    pub async fn authorize(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        let decision = self.decide(credential).await;

        match &decision {
            Ok(principal) => {
                record_gateway_decision("authorized");
                debug!(
                    api_key_id = %principal.key_id(),
                    agent_id = principal.agent_id(),
                    company_id = principal.company_id(),
                    "Agent request authorized"
                );
            }
            Err(e) => {
                record_gateway_decision(e.outcome());
                match e {
                    AuthError::UpstreamUnavailable(message) => {
                        error!(outcome = e.outcome(), error = %message, "Agent request rejected")
                    }
                    _ => warn!(outcome = e.outcome(), error = %e, "Agent request rejected"),
                }
            }
        }

        decision
    }

    async fn decide(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let principal = self.validator.validate(credential).await?;

        let admission = self
            .rate_limiter
            .admit(principal.key_id(), principal.rate_limits())
            .await
            .map_err(|e| AuthError::unavailable(e.to_string()))?;

        match admission {
            Admission::Admitted => Ok(principal),
            Admission::Denied { window, .. } => {
                debug!(
                    api_key_id = %principal.key_id(),
                    window = %window,
                    "Rate budget exhausted"
                );
                Err(AuthError::RateLimited {
                    retry_after_secs: admission.retry_after_secs(),
                })
            }
        }
    }
}
