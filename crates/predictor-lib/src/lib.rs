//! Predictive modeling library for the appraisal platform
//!
//! This crate provides the core functionality for:
//! - Normalizing item attributes into feature vectors
//! - Training and serving a price regressor with Monte Carlo dropout
//! - Training and serving an image category classifier
//! - Feature importance explanations
//! - Persisting and reloading trained models
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod importance;
pub mod models;
pub mod nn;
pub mod observability;
pub mod persistence;
pub mod preprocessing;
pub mod price;
pub mod progress;
pub mod registry;
pub mod service;
pub mod vision;

pub use error::{ModelError, Result};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthReport, Readiness,
};
pub use models::*;
pub use observability::{EventLogger, ModelMetrics};
pub use progress::ProgressEvent;
pub use registry::{ModelInfo, ModelStatus, Performance};
pub use service::{ModelService, ModelServiceConfig, ModelState, WarmStartReport};
