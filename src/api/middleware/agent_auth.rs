//! Agent API key authentication middleware
//!
//! Gates the agent-facing routes: extracts the presented key, runs the
//! gateway decision and attaches the resolved [`Principal`] to the request.
//! Authorized requests are written to the usage log once answered. Requests
//! outside the agent prefix pass through untouched.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::warn;

use crate::api::state::AppState;
use crate::api::types::ApiError;
use crate::domain::api_key::{AuthError, Principal, UsageLogRepository, UsageRecord};

/// Segment-aware path prefix match for the agent routes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRouteFilter {
    prefix: String,
}

impl AgentRouteFilter {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim().trim_end_matches('/');

        let prefix = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };

        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `/api/ai-agent` and `/api/ai-agent/...` match, `/api/ai-agentx` does not
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// One way of presenting an API key on a request
#[derive(Debug, Clone, Copy)]
pub struct CredentialExtractor {
    pub name: &'static str,
    extract: fn(&HeaderMap) -> Option<&str>,
}

impl CredentialExtractor {
    pub fn extract<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        (self.extract)(headers)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Extractors in precedence order; the first non-empty value wins
pub const CREDENTIAL_EXTRACTORS: &[CredentialExtractor] = &[
    CredentialExtractor {
        name: "authorization_bearer",
        extract: bearer_credential,
    },
    CredentialExtractor {
        name: "authorization_apikey",
        extract: apikey_scheme_credential,
    },
    CredentialExtractor {
        name: "x_api_key",
        extract: x_api_key_credential,
    },
];

fn bearer_credential(headers: &HeaderMap) -> Option<&str> {
    authorization_with_scheme(headers, "Bearer")
}

fn apikey_scheme_credential(headers: &HeaderMap) -> Option<&str> {
    authorization_with_scheme(headers, "ApiKey")
}

fn x_api_key_credential(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-api-key")?.to_str().ok()
}

fn authorization_with_scheme<'a>(headers: &'a HeaderMap, scheme: &str) -> Option<&'a str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim_start();
    let (presented_scheme, credential) = value.split_once(' ')?;

    presented_scheme
        .eq_ignore_ascii_case(scheme)
        .then_some(credential)
}

/// Find the presented API key, if any
pub fn extract_credential(headers: &HeaderMap) -> Option<&str> {
    CREDENTIAL_EXTRACTORS
        .iter()
        .find_map(|extractor| extractor.extract(headers))
}

/// Authenticate and rate-limit requests to the agent routes
pub async fn agent_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.agent_routes.matches(request.uri().path()) {
        return next.run(request).await;
    }

    let credential = extract_credential(request.headers()).map(str::to_owned);

    match state.gateway.authorize(credential.as_deref()).await {
        Ok(principal) => {
            let usage = UsageRecord::started(
                &principal,
                request.method().as_str(),
                request.uri().path(),
                Utc::now(),
            )
            .with_client(client_ip(&request), user_agent(request.headers()));

            request.extensions_mut().insert(principal);

            let started = Instant::now();
            let response = next.run(request).await;

            spawn_usage_write(
                state.usage_log.clone(),
                usage.completed(response.status().as_u16(), started.elapsed()),
            );

            response
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Proxy headers first, then the socket peer
fn client_ip(request: &Request) -> Option<String> {
    let headers = request.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    match forwarded {
        Some(ip) => Some(ip.to_string()),
        None => request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string()),
    }
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::USER_AGENT)?.to_str().ok()
}

/// Usage logging never holds up or fails the response
fn spawn_usage_write(usage_log: Arc<dyn UsageLogRepository>, record: UsageRecord) {
    tokio::spawn(async move {
        let api_key_id = record.api_key_id;

        if let Err(e) = usage_log.record(record).await {
            warn!(api_key_id = %api_key_id, error = %e, "Failed to record API key usage");
        }
    });
}

/// Extractor for the authenticated agent
#[derive(Debug, Clone)]
pub struct AgentPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AgentPrincipal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AgentPrincipal)
            .ok_or_else(|| AuthError::MissingCredential.into())
    }
}
