//! HTTP API: metrics exposition plus health probes

use crate::gauges::ExpositionFormat;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::scrape::ScrapeHandler;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scraper: ScrapeHandler,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(scraper: ScrapeHandler, health_registry: HealthRegistry) -> Self {
        Self {
            scraper,
            health_registry,
        }
    }
}

/// Scrape the metrics API, then expose every gauge
///
/// Upstream failures become a 500 whose body is the error text.
async fn metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let format = ExpositionFormat::negotiate(accept);

    match state.scraper.scrape().await {
        Ok(_) => {
            state
                .health_registry
                .record_success(components::METRICS_SOURCE)
                .await;
        }
        Err(err) => {
            let message = err.to_string();
            state
                .health_registry
                .record_failure(components::METRICS_SOURCE, message.clone())
                .await;
            return (StatusCode::INTERNAL_SERVER_ERROR, message).into_response();
        }
    }

    match state.scraper.render(format) {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, format.content_type())],
            buffer,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode metrics: {err}"),
            )
                .into_response()
        }
    }
}

/// Liveness: 200 unless the metrics source crossed its failure threshold
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", any(metrics).layer(CompressionLayer::new()))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
