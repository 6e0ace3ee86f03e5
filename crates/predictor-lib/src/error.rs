//! Error taxonomy for the modeling service

use crate::models::ModelKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised by training, inference and artifact handling.
///
/// None of these are retried internally; the caller decides how to map
/// them (the CRUD boundary reports them as a generic server error).
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("insufficient training data: need at least {required} samples, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("{0} model is not initialized; train or load it first")]
    ModelNotInitialized(ModelKind),

    #[error("normalization statistics not found at {}", .0.display())]
    StatsNotFound(PathBuf),

    #[error("model artifact is corrupt: {0}")]
    ArtifactCorrupt(String),

    #[error("training diverged at epoch {epoch} before any epoch produced finite weights")]
    TrainingDiverged { epoch: usize },

    #[error("unknown category label {0:?}")]
    UnknownLabel(String),

    #[error("invalid architecture: {0}")]
    InvalidArchitecture(String),

    #[error("tensor shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("training task failed: {0}")]
    Task(String),
}

impl ModelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable label, used for metrics and structured logs
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "insufficient_data",
            Self::ModelNotInitialized(_) => "model_not_initialized",
            Self::StatsNotFound(_) => "stats_not_found",
            Self::ArtifactCorrupt(_) => "artifact_corrupt",
            Self::TrainingDiverged { .. } => "training_diverged",
            Self::UnknownLabel(_) => "unknown_label",
            Self::InvalidArchitecture(_) => "invalid_architecture",
            Self::Shape(_) => "shape",
            Self::Image(_) => "image",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Task(_) => "task",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = ModelError::InsufficientData {
            required: 5,
            got: 4,
        };
        assert_eq!(
            err.to_string(),
            "insufficient training data: need at least 5 samples, got 4"
        );
        assert_eq!(err.kind_label(), "insufficient_data");
    }

    #[test]
    fn test_not_initialized_names_model() {
        let err = ModelError::ModelNotInitialized(ModelKind::Image);
        assert!(err.to_string().starts_with("image model"));
    }
}
