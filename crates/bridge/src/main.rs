//! Kube Metrics Bridge - Prometheus exporter for the Kubernetes metrics API
//!
//! On every scrape of `/metrics` this binary queries metrics-server for
//! node and container usage and republishes it as Prometheus gauges.

use anyhow::{Context, Result};
use bridge_lib::{
    api::{self, AppState},
    health::{components, HealthRegistry},
    source, KubeMetricsSource, ScrapeHandler, StructuredLogger,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting kube-metrics-bridge");

    let config = config::BridgeConfig::load()?;
    let client_options = config.client_options();
    info!(
        cluster = %client_options.cluster_label(),
        namespace = %config.namespace,
        "Bridge configured"
    );

    // Without a working client there is nothing to serve
    let client = source::connect(&client_options).await?;
    let metrics_source = Arc::new(KubeMetricsSource::new(client));

    let logger = StructuredLogger::new(client_options.cluster_label());
    let scraper = ScrapeHandler::new(metrics_source, logger.clone())
        .context("Failed to register metrics")?
        .with_namespace(config.namespace.clone());

    let health_registry = HealthRegistry::with_failure_threshold(config.unhealthy_after_failures);
    health_registry.register(components::METRICS_SOURCE).await;

    let app_state = Arc::new(AppState::new(scraper, health_registry.clone()));

    let listen_addr = config.listen_addr();
    logger.log_startup(BRIDGE_VERSION, &listen_addr.to_string());
    health_registry.set_ready(true).await;

    api::serve(listen_addr, app_state, shutdown_signal(logger)).await?;

    info!("Shutting down");

    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix (sent by the kubelet)
async fn shutdown_signal(logger: StructuredLogger) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => logger.log_shutdown("SIGINT received"),
        _ = terminate => logger.log_shutdown("SIGTERM received"),
    }
}
