//! Serve command - runs the gateway HTTP server

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::api::create_router_with_metrics;
use crate::config::AppConfig;
use crate::infrastructure::api_key::spawn_sweeper;
use crate::infrastructure::observability::{init_metrics, init_tracing, shutdown_tracing};

/// Run the gateway server until SIGINT/SIGTERM
pub async fn run() -> anyhow::Result<()> {
    let (config, load_error) = AppConfig::load_or_default();
    init_tracing(&config.logging, &config.telemetry);

    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load configuration, falling back to defaults");
    }

    let state = crate::create_app_state(&config).await?;
    let sweeper = spawn_sweeper(
        state.rate_limiter.clone(),
        Duration::from_secs(config.rate_limit.cleanup_interval_secs.max(1)),
    );

    let metrics = init_metrics(&config.telemetry);
    let app = create_router_with_metrics(state, metrics, &config.telemetry.metrics_path);

    let addr = build_socket_addr(&config)?;
    info!(
        route_prefix = %config.gateway.route_prefix,
        "Starting agent gateway on {}", addr
    );

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    shutdown_tracing();
    info!("Agent gateway shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

fn build_socket_addr(config: &AppConfig) -> anyhow::Result<SocketAddr> {
    Ok(SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_socket_addr() {
        let addr = build_socket_addr(&AppConfig::default()).unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_invalid_host_fails() {
        let mut config = AppConfig::default();
        config.server.host = "not-an-ip".to_string();
        assert!(build_socket_addr(&config).is_err());
    }
}
