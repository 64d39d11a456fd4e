//! Metrics HTTP Server for cliprelay
//!
//! Exposes the relay snapshot over HTTP for the dashboard and monitoring tools.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;

use crate::metrics::{RelaySnapshot, SharedMetrics};

/// Port the metrics server listens on
pub const METRICS_PORT: u16 = 7879;

/// Errors that can occur when running the metrics server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /metrics endpoint
/// Returns the current RelaySnapshot as JSON
async fn get_metrics(State(metrics): State<SharedMetrics>) -> Json<RelaySnapshot> {
    let snapshot = metrics.read().await.clone();
    Json(snapshot)
}

/// Creates the axum Router with metrics endpoint
pub fn create_metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(metrics)
}

/// Runs the metrics HTTP server on 127.0.0.1:7879
///
/// # Arguments
/// * `metrics` - Shared metrics state to serve
///
/// # Returns
/// * `Ok(())` if server shuts down gracefully
/// * `Err(ServerError)` if server fails to start
pub async fn run_metrics_server(metrics: SharedMetrics) -> Result<(), ServerError> {
    let app = create_metrics_router(metrics);
    let addr = SocketAddr::from(([127, 0, 0, 1], METRICS_PORT));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
