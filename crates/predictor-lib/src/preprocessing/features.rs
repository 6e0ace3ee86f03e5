//! Feature encoding for the price model
//!
//! Turns raw item attributes into fixed-length feature vectors. Training
//! computes fresh statistics over the whole sample set and pins the
//! configured vocabularies into them; inference reuses those statistics.

use super::normalization::{AttributeRange, NormalizationStats, TargetStats};
use super::vocabulary::Vocabulary;
use crate::models::{FeatureVector, ItemAttributes, TrainingSample, FEATURE_COUNT};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Vocabularies used to encode the categorical attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabularies {
    pub category: Vocabulary,
    pub condition: Vocabulary,
    pub rarity: Vocabulary,
}

impl Default for Vocabularies {
    fn default() -> Self {
        Self {
            category: Vocabulary::default_categories(),
            condition: Vocabulary::default_conditions(),
            rarity: Vocabulary::default_rarities(),
        }
    }
}

/// Output of [`FeatureEncoder::fit`]
#[derive(Debug, Clone)]
pub struct EncodedDataset {
    pub features: Vec<FeatureVector>,
    /// Min-max normalized targets
    pub targets: Vec<f32>,
    pub stats: NormalizationStats,
}

impl EncodedDataset {
    /// Features as a `(samples, FEATURE_COUNT)` matrix
    pub fn feature_matrix(&self) -> Array2<f32> {
        feature_matrix(&self.features)
    }

    /// Targets as a `(samples, 1)` column
    pub fn target_column(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.targets.len(), 1), |(i, _)| self.targets[i])
    }
}

/// Stack feature vectors into a `(n, FEATURE_COUNT)` matrix
pub fn feature_matrix(features: &[FeatureVector]) -> Array2<f32> {
    Array2::from_shape_fn((features.len(), FEATURE_COUNT), |(i, j)| features[i].0[j])
}

/// Builds training sets and their statistics from the configured vocabularies
#[derive(Debug, Clone, Default)]
pub struct FeatureEncoder {
    vocabularies: Vocabularies,
}

impl FeatureEncoder {
    pub fn new(vocabularies: Vocabularies) -> Self {
        Self { vocabularies }
    }

    pub fn vocabularies(&self) -> &Vocabularies {
        &self.vocabularies
    }

    /// Compute statistics over `samples` and encode them.
    ///
    /// Missing continuous attributes count as 0, including for the
    /// min/max computation.
    pub fn fit(&self, samples: &[TrainingSample]) -> EncodedDataset {
        let column = |f: fn(&ItemAttributes) -> Option<f32>| -> Vec<f32> {
            samples
                .iter()
                .map(|s| f(&s.attributes).unwrap_or(0.0))
                .collect()
        };
        let targets: Vec<f32> = samples.iter().map(|s| s.estimated_value).collect();

        let stats = NormalizationStats {
            height: AttributeRange::from_values(&column(|a| a.height)),
            width: AttributeRange::from_values(&column(|a| a.width)),
            weight: AttributeRange::from_values(&column(|a| a.weight)),
            age: AttributeRange::from_values(&column(|a| a.age)),
            price: TargetStats::from_values(&targets),
            vocabularies: self.vocabularies.clone(),
        };

        let features = samples.iter().map(|s| stats.encode(&s.attributes)).collect();
        let targets = targets
            .iter()
            .map(|&t| stats.normalize_target(t))
            .collect();

        EncodedDataset {
            features,
            targets,
            stats,
        }
    }
}
