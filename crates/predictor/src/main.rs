//! Appraisal predictor - predictive modeling service
//!
//! Loads persisted models at startup and serves health, model status and
//! metrics endpoints for the appraisal platform.

use anyhow::{Context, Result};
use appraisal_predictor::{api, config::ServiceConfig};
use predictor_lib::{
    health::HealthRegistry,
    observability::EventLogger,
    ModelKind, ModelService,
};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting appraisal-predictor");

    let config = ServiceConfig::load()?;
    info!(
        storage_dir = %config.model.storage_dir.display(),
        api_port = config.api_port,
        "Service configured"
    );

    let health_registry = HealthRegistry::new();

    let logger = EventLogger::new(&config.instance);
    let service = ModelService::new(config.model.clone())
        .context("Failed to create model service")?
        .with_health(health_registry.clone());
    let service = Arc::new(service);

    let warm = service.warm_start().await;
    info!(
        price_ready = warm.is_ready(ModelKind::Price),
        image_ready = warm.is_ready(ModelKind::Image),
        "Models warmed up"
    );

    // Forward training progress to the debug log
    let mut progress = Box::pin(service.progress_stream());
    tokio::spawn(async move {
        while let Some(event) = progress.next().await {
            debug!(model = %event.model(), event = ?event, "Training progress");
        }
    });

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), service));

    health_registry.mark_started().await;
    logger.log_startup(
        SERVICE_VERSION,
        &config.model.storage_dir.display().to_string(),
    );

    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move { api::serve(api_port, app_state).await });

    tokio::select! {
        result = api_handle => {
            result.context("API server task panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
    }
    info!("Shutting down");

    Ok(())
}
