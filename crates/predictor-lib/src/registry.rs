//! Model status registry
//!
//! Tracks, per model kind, whether a model is ready, when it was last
//! trained, its version and its last training performance. The version is
//! a semver string whose patch component is bumped on every successful
//! training run.

use crate::models::ModelKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Version of a model that has never been trained
pub const INITIAL_VERSION: &str = "1.0.0";

/// Performance figures of the last training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub validation_loss: f32,
    pub training_loss: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f32>,
    #[serde(default)]
    pub feature_importance: Vec<f32>,
}

impl Performance {
    /// False when any figure is NaN or infinite; such figures cannot be
    /// written to a descriptor and read back.
    pub fn is_finite(&self) -> bool {
        self.validation_loss.is_finite()
            && self.training_loss.is_finite()
            && self.accuracy.map_or(true, f32::is_finite)
            && self.feature_importance.iter().all(|v| v.is_finite())
    }
}

/// Status of one model kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub initialized: bool,
    pub last_trained: Option<DateTime<Utc>>,
    pub version: String,
    pub performance: Option<Performance>,
}

impl Default for ModelStatus {
    fn default() -> Self {
        Self {
            initialized: false,
            last_trained: None,
            version: INITIAL_VERSION.to_string(),
            performance: None,
        }
    }
}

/// Read-only snapshot of every model's status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub price_model: ModelStatus,
    pub image_model: ModelStatus,
}

impl ModelInfo {
    pub fn get(&self, kind: ModelKind) -> &ModelStatus {
        match kind {
            ModelKind::Price => &self.price_model,
            ModelKind::Image => &self.image_model,
        }
    }
}

/// Increment the patch component of a semver string.
///
/// An unparseable version restarts from [`INITIAL_VERSION`].
pub fn bump_patch(version: &str) -> String {
    let mut parsed = semver::Version::parse(version).unwrap_or_else(|e| {
        warn!(version = %version, error = %e, "Unparseable model version; restarting");
        semver::Version::new(1, 0, 0)
    });
    parsed.patch += 1;
    parsed.pre = semver::Prerelease::EMPTY;
    parsed.build = semver::BuildMetadata::EMPTY;
    parsed.to_string()
}

/// Per-kind status records
#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    price: ModelStatus,
    image: ModelStatus,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ModelKind) -> &ModelStatus {
        match kind {
            ModelKind::Price => &self.price,
            ModelKind::Image => &self.image,
        }
    }

    fn get_mut(&mut self, kind: ModelKind) -> &mut ModelStatus {
        match kind {
            ModelKind::Price => &mut self.price,
            ModelKind::Image => &mut self.image,
        }
    }

    /// The status a successful training run would produce, without
    /// recording it. Persist it first, then [`StatusRegistry::restore`] it.
    pub fn next_status(
        &self,
        kind: ModelKind,
        performance: Performance,
        trained_at: DateTime<Utc>,
    ) -> ModelStatus {
        ModelStatus {
            initialized: true,
            last_trained: Some(trained_at),
            version: bump_patch(&self.get(kind).version),
            performance: Some(performance),
        }
    }

    /// Replace the status of `kind`, e.g. with the one stored in a loaded
    /// artifact.
    pub fn restore(&mut self, kind: ModelKind, status: ModelStatus) {
        *self.get_mut(kind) = status;
    }

    pub fn snapshot(&self) -> ModelInfo {
        ModelInfo {
            price_model: self.price.clone(),
            image_model: self.image.clone(),
        }
    }
}
