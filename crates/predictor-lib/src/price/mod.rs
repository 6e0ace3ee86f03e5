//! Price regression model
//!
//! This module provides:
//! - The price network architecture and its hyperparameters
//! - Training over encoded samples (`trainer`)
//! - Monte Carlo dropout predictions with confidence bounds (`predictor`)

mod predictor;
mod trainer;

pub use predictor::{
    coefficient_of_variation, confidence, price_range, McSummary, PricePredictor,
    PredictorConfig, DEFAULT_MC_SAMPLES, RANGE_SIGMAS,
};
pub use trainer::{PriceTrainer, TrainedPriceModel};

use crate::models::FEATURE_COUNT;
use crate::nn::{Activation, AdamConfig, LayerSpec, Sequential};
use crate::preprocessing::NormalizationStats;
use serde::{Deserialize, Serialize};

/// Fewest samples a price model can be trained on
pub const MIN_TRAINING_SAMPLES: usize = 5;

/// Price model hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// Epochs when the caller does not ask for a specific count
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f32,
    pub dropout: f32,
    /// L2 factor on the dense kernels
    pub l2: f32,
    pub batch_norm_momentum: f32,
    pub batch_norm_epsilon: f32,
    pub adam: AdamConfig,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 8,
            validation_split: 0.2,
            dropout: 0.2,
            l2: 0.001,
            batch_norm_momentum: 0.9,
            batch_norm_epsilon: 1e-3,
            adam: AdamConfig::default(),
        }
    }
}

impl PriceConfig {
    /// `Dense(16) → BN → Dropout → Dense(8) → BN → Dropout → Dense(1)`
    pub fn architecture(&self) -> Vec<LayerSpec> {
        let hidden = |inputs: usize, units: usize| {
            [
                LayerSpec::Dense {
                    inputs,
                    units,
                    activation: Activation::Relu,
                    l2: self.l2,
                },
                LayerSpec::BatchNorm {
                    features: units,
                    momentum: self.batch_norm_momentum,
                    epsilon: self.batch_norm_epsilon,
                },
                LayerSpec::Dropout { rate: self.dropout },
            ]
        };

        let mut specs = Vec::with_capacity(7);
        specs.extend(hidden(FEATURE_COUNT, 16));
        specs.extend(hidden(16, 8));
        specs.push(LayerSpec::Dense {
            inputs: 8,
            units: 1,
            activation: Activation::Linear,
            l2: 0.0,
        });
        specs
    }
}

/// A trained price network together with the statistics it was trained on.
#[derive(Debug, Clone)]
pub struct PriceModel {
    network: Sequential,
    stats: NormalizationStats,
    /// Last finite validation loss; feeds the confidence score
    validation_loss: f32,
}

impl PriceModel {
    pub fn new(network: Sequential, stats: NormalizationStats, validation_loss: f32) -> Self {
        Self {
            network,
            stats,
            validation_loss,
        }
    }

    pub fn network(&self) -> &Sequential {
        &self.network
    }

    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    pub fn validation_loss(&self) -> f32 {
        self.validation_loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_shapes() {
        let specs = PriceConfig::default().architecture();
        assert_eq!(specs.len(), 7);

        let mut shape = vec![FEATURE_COUNT];
        for spec in &specs {
            shape = spec.output_shape(&shape).unwrap();
        }
        assert_eq!(shape, vec![1]);
    }

    #[test]
    fn test_only_hidden_kernels_are_regularized() {
        let specs = PriceConfig::default().architecture();
        let l2: Vec<f32> = specs
            .iter()
            .filter_map(|s| match s {
                LayerSpec::Dense { l2, .. } => Some(*l2),
                _ => None,
            })
            .collect();
        assert_eq!(l2, vec![0.001, 0.001, 0.0]);
    }
}
