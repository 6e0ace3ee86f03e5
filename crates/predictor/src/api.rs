//! HTTP API for health checks, model status and Prometheus metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use predictor_lib::{
    health::{ComponentStatus, HealthRegistry},
    ModelKind, ModelService,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub service: Arc<ModelService>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, service: Arc<ModelService>) -> Self {
        Self {
            health_registry,
            service,
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.report().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        // An untrained model still answers status queries
        ComponentStatus::Degraded => StatusCode::OK,
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

/// Status of both models
async fn models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.get_model_info().await)
}

/// Status of one model, `/models/price` or `/models/image`
async fn model(State(state): State<Arc<AppState>>, Path(kind): Path<String>) -> Response {
    match kind.parse::<ModelKind>() {
        Ok(kind) => {
            let info = state.service.get_model_info().await;
            let body = json!({
                "model": kind,
                "state": state.service.state_label(kind).await,
                "status": info.get(kind),
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(message) => (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response(),
    }
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/models", get(models))
        .route("/models/:kind", get(model))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
