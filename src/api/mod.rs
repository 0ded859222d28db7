//! API layer - HTTP endpoints and middleware

pub mod agent;
pub mod health;
pub mod middleware;
pub mod router;
pub mod state;
pub mod types;

pub use middleware::AgentPrincipal;
pub use router::{create_router, create_router_with_metrics};
pub use state::AppState;
