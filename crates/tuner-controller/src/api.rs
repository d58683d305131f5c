//! HTTP API: health, readiness, published bundles and Prometheus metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use tuner_lib::{
    health::HealthRegistry,
    observability::TunerMetrics,
    publish::{DirectoryChannel, PublishedBundle},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: TunerMetrics,
    /// Set when bundles are written to disk
    pub channel: Option<Arc<DirectoryChannel>>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: TunerMetrics) -> Self {
        Self {
            health_registry,
            metrics,
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: Arc<DirectoryChannel>) -> Self {
        self.channel = Some(channel);
        self
    }
}

#[derive(Serialize)]
struct BundlesResponse {
    latest: Option<PublishedBundle>,
    history: Vec<PublishedBundle>,
}

fn json_with_status<T: Serialize>(ok: bool, body: T) -> Response {
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// Degraded still answers 200; only an unhealthy component fails the probe
async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let health = state.health_registry.health().await;
    json_with_status(health.status.is_operational(), health)
}

async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let readiness = state.health_registry.readiness().await;
    json_with_status(readiness.ready, readiness)
}

/// Bundles retained by the directory channel, newest first
async fn bundles(State(state): State<Arc<AppState>>) -> Response {
    let Some(channel) = &state.channel else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no bundle directory configured" })),
        )
            .into_response();
    };

    let history = channel.history().await;
    let body = BundlesResponse {
        latest: history.first().cloned(),
        history,
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn metrics() -> Response {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/bundles", get(bundles))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "API listening");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
