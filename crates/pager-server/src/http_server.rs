//! HTTP server for the Prometheus metrics and status endpoints.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use pager::{PagerMetrics, WatchEngine};
use prometheus_client::encoding::text::encode;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    metrics: Arc<PagerMetrics>,
    engine: Arc<WatchEngine>,
}

/// HTTP server for metrics endpoint
pub struct MetricsServer {
    state: AppState,
    listen_addr: String,
}

impl MetricsServer {
    pub fn new(metrics: Arc<PagerMetrics>, engine: Arc<WatchEngine>, listen_addr: String) -> Self {
        Self {
            state: AppState { metrics, engine },
            listen_addr,
        }
    }

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/status", get(status_handler))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state)
    }

    /// Run the HTTP server
    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!(listen_addr = %self.listen_addr, "Metrics server listening");

        axum::serve(listener, Self::router(self.state)).await
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &state.metrics.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let engine = &state.engine;
    Json(json!({
        "leader": engine.is_leader().await,
        "phase": engine.phase().await.as_str(),
        "term": engine.term(),
        "watching": engine.is_watching(),
        "alerts": engine.alert_count().await,
    }))
    .into_response()
}
