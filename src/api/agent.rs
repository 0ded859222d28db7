//! Agent-facing endpoints
//!
//! Minimal stand-in for the agent API: everything here runs behind the
//! agent authentication middleware.

use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use super::middleware::AgentPrincipal;
use super::state::AppState;

/// Create the agent router
pub fn create_agent_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(agent_health))
        .route("/whoami", get(whoami))
}

#[derive(Debug, Serialize)]
pub struct AgentHealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    pub agent_id: i64,
    pub api_key_id: i64,
    pub company_id: i64,
    pub permissions: PermissionsView,
}

/// `"*"` for master keys, otherwise the sorted permission list
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PermissionsView {
    All(&'static str),
    Subset(Vec<String>),
}

async fn agent_health(_principal: AgentPrincipal) -> Json<AgentHealthResponse> {
    Json(AgentHealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn whoami(AgentPrincipal(principal): AgentPrincipal) -> Json<WhoAmIResponse> {
    let permissions = match principal.permissions().as_list() {
        None => PermissionsView::All("*"),
        Some(list) => PermissionsView::Subset(list),
    };

    Json(WhoAmIResponse {
        agent_id: principal.agent_id(),
        api_key_id: principal.key_id().value(),
        company_id: principal.company_id(),
        permissions,
    })
}
