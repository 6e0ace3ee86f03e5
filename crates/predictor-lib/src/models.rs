//! Core data models for the modeling service

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of encoded attributes in a feature vector
pub const FEATURE_COUNT: usize = 7;

/// Attribute names in feature-vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "height",
    "width",
    "weight",
    "category",
    "condition",
    "age",
    "rarity",
];

/// The two model types managed by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Price,
    Image,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Price, ModelKind::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Price => "price",
            ModelKind::Image => "image",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price" => Ok(ModelKind::Price),
            "image" => Ok(ModelKind::Image),
            other => Err(format!("unknown model type {other:?} (expected price or image)")),
        }
    }
}

/// Raw item attributes as supplied by the appraisal application.
///
/// Every attribute is optional; missing values are tolerated and
/// default to zero before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemAttributes {
    pub height: Option<f32>,
    pub width: Option<f32>,
    pub weight: Option<f32>,
    pub age: Option<f32>,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub rarity: Option<String>,
}

/// Training record: item attributes plus the appraised value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    #[serde(flatten)]
    pub attributes: ItemAttributes,
    #[serde(alias = "estimatedValue")]
    pub estimated_value: f32,
}

impl TrainingSample {
    pub fn new(attributes: ItemAttributes, estimated_value: f32) -> Self {
        Self {
            attributes,
            estimated_value,
        }
    }
}

/// Fixed-length encoded item, every element in [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f32; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Lower and upper bound of a price prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub low: f32,
    pub high: f32,
}

/// Price prediction with uncertainty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_value: f32,
    pub confidence: f32,
    pub range: PriceRange,
}

/// Image classification output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f32,
}

/// Labelled image used to train the classifier
#[derive(Debug, Clone)]
pub struct ImageSample {
    pub image: image::DynamicImage,
    pub category: String,
}

impl ImageSample {
    pub fn new(image: image::DynamicImage, category: impl Into<String>) -> Self {
        Self {
            image,
            category: category.into(),
        }
    }

    /// Decode an encoded image (PNG, JPEG, ...) into a training sample
    pub fn from_bytes(bytes: &[u8], category: impl Into<String>) -> crate::Result<Self> {
        Ok(Self::new(image::load_from_memory(bytes)?, category))
    }
}

/// Metrics recorded at the end of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub validation_loss: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_accuracy: Option<f32>,
}

/// Outcome of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model: ModelKind,
    pub history: Vec<EpochMetrics>,
    pub sample_count: usize,
    pub feature_count: usize,
    pub final_loss: f32,
    pub final_validation_loss: f32,
    pub feature_importance: Vec<f32>,
    pub version: String,
    /// Epoch at which a non-finite loss halted training, if any
    pub diverged_at_epoch: Option<usize>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_round_trip() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
        }
        assert!("text".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_training_sample_accepts_partial_records() {
        let json = r#"{"height": 12.5, "category": "art", "estimatedValue": 250.0}"#;
        let sample: TrainingSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.attributes.height, Some(12.5));
        assert_eq!(sample.attributes.category.as_deref(), Some("art"));
        assert!(sample.attributes.width.is_none());
        assert_eq!(sample.estimated_value, 250.0);
    }

    #[test]
    fn test_item_attributes_from_empty_object() {
        let item: ItemAttributes = serde_json::from_str("{}").unwrap();
        assert_eq!(item, ItemAttributes::default());
    }
}
