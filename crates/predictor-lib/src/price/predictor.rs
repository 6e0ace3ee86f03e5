//! Price prediction post-processing
//!
//! Turns Monte Carlo dropout samples into a denormalized price with a
//! confidence score and an uncertainty range.

use super::PriceModel;
use crate::models::{ItemAttributes, PredictionResult, PriceRange};
use crate::nn::Mode;
use crate::preprocessing::feature_matrix;
use crate::Result;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Stochastic passes per prediction batch
pub const DEFAULT_MC_SAMPLES: usize = 10;

/// Half-width of the price range in standard deviations
pub const RANGE_SIGMAS: f32 = 2.0;

/// Below this magnitude the mean or std counts as zero
const NEAR_ZERO: f32 = 1e-6;

/// Configuration for price prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Number of Monte Carlo dropout passes (at least 1)
    pub mc_samples: usize,
    /// Range half-width in standard deviations
    pub range_sigmas: f32,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            mc_samples: DEFAULT_MC_SAMPLES,
            range_sigmas: RANGE_SIGMAS,
        }
    }
}

/// Per-item population mean and standard deviation of the normalized outputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct McSummary {
    pub mean: f32,
    pub std: f32,
}

impl McSummary {
    /// Summarize `(passes, items)` outputs into one entry per item
    pub fn per_item(passes: &Array2<f32>) -> Vec<Self> {
        let mean = passes.mean_axis(Axis(0));
        let std = passes.std_axis(Axis(0), 0.0);
        match mean {
            Some(mean) => mean
                .iter()
                .zip(std.iter())
                .map(|(&mean, &std)| Self { mean, std })
                .collect(),
            None => Vec::new(),
        }
    }
}

/// `std / |mean|`, with 0 when both are ~0 and 1 when only the mean is ~0.
///
/// The mean is the raw normalized network output, which can be negative
/// before the clamp applied to the predicted value. Its magnitude is used
/// so such outputs give a positive spread instead of a confidence above 1.
pub fn coefficient_of_variation(mean: f32, std: f32) -> f32 {
    match (mean.abs() < NEAR_ZERO, std.abs() < NEAR_ZERO) {
        (true, true) => 0.0,
        (true, false) => 1.0,
        _ => std / mean.abs(),
    }
}

/// Confidence score combining prediction spread and validation error
pub fn confidence(cv: f32, validation_loss: f32) -> f32 {
    let score = 1.0 - (cv + validation_loss) / 2.0;
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}

/// `[max(0, value - k·std·span), value + k·std·span]`
pub fn price_range(value: f32, std: f32, span: f32, sigmas: f32) -> PriceRange {
    let half = sigmas * std * span;
    PriceRange {
        low: (value - half).max(0.0),
        high: value + half,
    }
}

/// Produces price predictions from a trained [`PriceModel`]
pub struct PricePredictor {
    config: PredictorConfig,
}

impl PricePredictor {
    pub fn new() -> Self {
        Self {
            config: PredictorConfig::default(),
        }
    }

    pub fn with_config(config: PredictorConfig) -> Self {
        Self { config }
    }

    /// Predict prices for `items` with Monte Carlo dropout.
    ///
    /// Features are encoded with the statistics and vocabularies stored
    /// in `model`.
    pub fn predict<R: Rng + ?Sized>(
        &self,
        model: &PriceModel,
        items: &[ItemAttributes],
        rng: &mut R,
    ) -> Result<Vec<PredictionResult>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let features = feature_matrix(&model.stats().encode_batch(items));
        let passes = self.config.mc_samples.max(1);

        let mut outputs = Array2::zeros((passes, items.len()));
        for mut row in outputs.outer_iter_mut() {
            let out = model
                .network()
                .infer(features.clone().into_dyn(), Mode::MonteCarlo, rng)?;
            row.iter_mut().zip(out.iter()).for_each(|(dst, v)| *dst = *v);
        }

        let results = McSummary::per_item(&outputs)
            .into_iter()
            .map(|summary| self.format(model, summary))
            .collect();

        debug!(
            items = items.len(),
            passes = passes,
            elapsed_us = start.elapsed().as_micros(),
            "Price prediction completed"
        );
        Ok(results)
    }

    /// Denormalize one summarized item into a [`PredictionResult`]
    pub fn format(&self, model: &PriceModel, summary: McSummary) -> PredictionResult {
        let stats = model.stats();
        let predicted_value = stats.denormalize_target(summary.mean.clamp(0.0, 1.0));
        let cv = coefficient_of_variation(summary.mean, summary.std);

        PredictionResult {
            predicted_value,
            confidence: confidence(cv, model.validation_loss()),
            range: price_range(
                predicted_value,
                summary.std,
                stats.target_span(),
                self.config.range_sigmas,
            ),
        }
    }
}

impl Default for PricePredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceModel {
    /// One pass with dropout off; normalized outputs, one per row.
    pub fn predict_deterministic(&self, features: &Array2<f32>) -> Result<Vec<f32>> {
        // Deterministic passes never draw from the rng
        let mut rng = StdRng::seed_from_u64(0);
        let out = self
            .network()
            .infer(features.clone().into_dyn(), Mode::Deterministic, &mut rng)?;
        Ok(out.iter().copied().collect())
    }

    /// Deterministic prediction for raw items, denormalized.
    pub fn predict_items_deterministic(&self, items: &[ItemAttributes]) -> Result<Vec<f32>> {
        let features = feature_matrix(&self.stats().encode_batch(items));
        Ok(self
            .predict_deterministic(&features)?
            .into_iter()
            .map(|y| self.stats().denormalize_target(y.clamp(0.0, 1.0)))
            .collect())
    }
}
