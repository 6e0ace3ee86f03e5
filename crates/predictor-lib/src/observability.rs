//! Observability infrastructure for the modeling service
//!
//! Provides:
//! - Prometheus metrics (training duration, prediction latency, counters, model version)
//! - Structured event logging with tracing

use crate::models::ModelKind;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, GaugeVec,
    HistogramVec, IntCounterVec,
};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use tracing::{error, info, warn};

/// Histogram buckets for inference latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Histogram buckets for training runs (in seconds)
const TRAINING_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ModelMetricsInner> = OnceLock::new();

struct ModelMetricsInner {
    training_duration_seconds: HistogramVec,
    prediction_latency_seconds: HistogramVec,
    trainings_total: IntCounterVec,
    training_diverged_total: IntCounterVec,
    predictions_total: IntCounterVec,
    errors_total: IntCounterVec,
    model_version_info: GaugeVec,
    current_versions: Mutex<HashMap<ModelKind, String>>,
}

impl ModelMetricsInner {
    fn new() -> Self {
        Self {
            training_duration_seconds: register_histogram_vec!(
                "appraisal_model_training_duration_seconds",
                "Wall time of completed training runs",
                &["model"],
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            prediction_latency_seconds: register_histogram_vec!(
                "appraisal_model_prediction_latency_seconds",
                "Time spent running inference for one request",
                &["model"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            trainings_total: register_int_counter_vec!(
                "appraisal_model_trainings_total",
                "Completed training runs",
                &["model"]
            )
            .expect("Failed to register trainings_total"),

            training_diverged_total: register_int_counter_vec!(
                "appraisal_model_training_diverged_total",
                "Training runs stopped early by a non-finite loss",
                &["model"]
            )
            .expect("Failed to register training_diverged_total"),

            predictions_total: register_int_counter_vec!(
                "appraisal_model_predictions_total",
                "Items predicted or images classified",
                &["model"]
            )
            .expect("Failed to register predictions_total"),

            errors_total: register_int_counter_vec!(
                "appraisal_model_errors_total",
                "Failed model operations by error kind",
                &["model", "kind"]
            )
            .expect("Failed to register errors_total"),

            model_version_info: register_gauge_vec!(
                "appraisal_model_version_info",
                "Version of the currently loaded model",
                &["model", "version"]
            )
            .expect("Failed to register model_version_info"),

            current_versions: Mutex::new(HashMap::new()),
        }
    }
}

/// Model metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ModelMetrics {
    _private: (),
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ModelMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ModelMetricsInner {
        GLOBAL_METRICS.get_or_init(ModelMetricsInner::new)
    }

    pub fn observe_training(&self, model: ModelKind, duration_secs: f64) {
        let inner = self.inner();
        inner
            .training_duration_seconds
            .with_label_values(&[model.as_str()])
            .observe(duration_secs);
        inner
            .trainings_total
            .with_label_values(&[model.as_str()])
            .inc();
    }

    pub fn inc_training_diverged(&self, model: ModelKind) {
        self.inner()
            .training_diverged_total
            .with_label_values(&[model.as_str()])
            .inc();
    }

    /// Record one inference request covering `items` predictions
    pub fn observe_prediction(&self, model: ModelKind, duration_secs: f64, items: usize) {
        let inner = self.inner();
        inner
            .prediction_latency_seconds
            .with_label_values(&[model.as_str()])
            .observe(duration_secs);
        inner
            .predictions_total
            .with_label_values(&[model.as_str()])
            .inc_by(items as u64);
    }

    pub fn inc_error(&self, model: ModelKind, kind: &str) {
        self.inner()
            .errors_total
            .with_label_values(&[model.as_str(), kind])
            .inc();
    }

    /// Replace the version series of `model`; only one version per model is exported
    pub fn set_model_version(&self, model: ModelKind, version: &str) {
        let inner = self.inner();
        let mut current = match inner.current_versions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = current.insert(model, version.to_string()) {
            if previous != version {
                let _ = inner
                    .model_version_info
                    .remove_label_values(&[model.as_str(), &previous]);
            }
        }
        inner
            .model_version_info
            .with_label_values(&[model.as_str(), version])
            .set(1.0);
    }
}

/// Structured logger for modeling events
///
/// Emits one log line per significant lifecycle event with a stable
/// `event` field, so the lines can be filtered downstream.
#[derive(Clone)]
pub struct EventLogger {
    instance: String,
}

impl EventLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_training_started(&self, model: ModelKind, samples: usize, epochs: usize) {
        info!(
            event = "training_started",
            instance = %self.instance,
            model = %model,
            samples = samples,
            epochs = epochs,
            "Training started"
        );
    }

    pub fn log_training_completed(
        &self,
        model: ModelKind,
        version: &str,
        final_loss: f32,
        validation_loss: f32,
        duration_ms: u64,
    ) {
        info!(
            event = "training_completed",
            instance = %self.instance,
            model = %model,
            version = %version,
            final_loss = final_loss,
            validation_loss = validation_loss,
            duration_ms = duration_ms,
            "Training completed"
        );
    }

    pub fn log_training_diverged(&self, model: ModelKind, epoch: usize, recovered: bool) {
        warn!(
            event = "training_diverged",
            instance = %self.instance,
            model = %model,
            epoch = epoch,
            recovered = recovered,
            "Non-finite loss during training"
        );
    }

    pub fn log_training_failed(&self, model: ModelKind, error_kind: &str, error: &str) {
        error!(
            event = "training_failed",
            instance = %self.instance,
            model = %model,
            error_kind = %error_kind,
            error = %error,
            "Training failed; previous model kept"
        );
    }

    pub fn log_model_loaded(&self, model: ModelKind, version: &str, source: &str) {
        info!(
            event = "model_loaded",
            instance = %self.instance,
            model = %model,
            version = %version,
            source = %source,
            "Model loaded"
        );
    }

    pub fn log_startup(&self, version: &str, storage_dir: &str) {
        info!(
            event = "service_started",
            instance = %self.instance,
            service_version = %version,
            storage_dir = %storage_dir,
            "Appraisal modeling service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Appraisal modeling service shutting down"
        );
    }
}
