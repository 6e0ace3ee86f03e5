//! Min-max normalization and the statistics it depends on

use super::features::Vocabularies;
use crate::models::{FeatureVector, ItemAttributes};
use serde::{Deserialize, Serialize};

/// Value returned when an attribute has no range across the sample set
pub const DEGENERATE_RANGE_VALUE: f32 = 0.5;

/// Scale `x` from `[min, max]` into `[0, 1]`.
///
/// When `max == min` every value maps to 0.5.
pub fn normalize(x: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span == 0.0 {
        return DEGENERATE_RANGE_VALUE;
    }
    (x - min) / span
}

/// Observed range of one continuous attribute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttributeRange {
    pub min: f32,
    pub max: f32,
}

impl AttributeRange {
    pub fn from_values(values: &[f32]) -> Self {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
        }
        if values.is_empty() {
            min = 0.0;
            max = 0.0;
        }
        Self { min, max }
    }

    /// Normalize into [0,1], clamping values outside the observed range
    pub fn scale(&self, x: f32) -> f32 {
        normalize(x, self.min, self.max).clamp(0.0, 1.0)
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }
}

/// Statistics of the regression target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub std: f32,
}

impl TargetStats {
    pub fn from_values(values: &[f32]) -> Self {
        let range = AttributeRange::from_values(values);
        let n = values.len().max(1) as f32;
        let mean = values.iter().sum::<f32>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        Self {
            min: range.min,
            max: range.max,
            mean,
            std: var.sqrt(),
        }
    }
}

/// Everything needed to turn raw attributes into model inputs and model
/// outputs back into prices.
///
/// One instance is computed per training run and the same instance is
/// used for every later inference on that model, vocabularies included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub height: AttributeRange,
    pub width: AttributeRange,
    pub weight: AttributeRange,
    pub age: AttributeRange,
    pub price: TargetStats,
    pub vocabularies: Vocabularies,
}

impl NormalizationStats {
    /// Encode one item into the model's input layout
    pub fn encode(&self, item: &ItemAttributes) -> FeatureVector {
        let vocab = &self.vocabularies;
        FeatureVector([
            self.height.scale(item.height.unwrap_or(0.0)),
            self.width.scale(item.width.unwrap_or(0.0)),
            self.weight.scale(item.weight.unwrap_or(0.0)),
            vocab.category.encode(item.category.as_deref()),
            vocab.condition.encode(item.condition.as_deref()),
            self.age.scale(item.age.unwrap_or(0.0)),
            vocab.rarity.encode(item.rarity.as_deref()),
        ])
    }

    pub fn encode_batch(&self, items: &[ItemAttributes]) -> Vec<FeatureVector> {
        items.iter().map(|item| self.encode(item)).collect()
    }

    /// Target normalization uses min-max, not z-score
    pub fn normalize_target(&self, value: f32) -> f32 {
        normalize(value, self.price.min, self.price.max)
    }

    pub fn denormalize_target(&self, normalized: f32) -> f32 {
        self.price.min + normalized * self.target_span()
    }

    pub fn target_span(&self) -> f32 {
        self.price.max - self.price.min
    }
}
