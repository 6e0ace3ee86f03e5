use super::{PriceConfig, PriceModel, MIN_TRAINING_SAMPLES};
use crate::importance::feature_importance;
use crate::models::{EpochMetrics, TrainingSample, FEATURE_COUNT};
use crate::nn::{fit, FitConfig, FitOutcome, Mse, Sequential};
use crate::preprocessing::FeatureEncoder;
use crate::{ModelError, Result};
use rand::Rng;
use tracing::{debug, info};

/// Result of a successful price training run
#[derive(Debug, Clone)]
pub struct TrainedPriceModel {
    pub model: PriceModel,
    pub outcome: FitOutcome,
    pub feature_importance: Vec<f32>,
}

impl TrainedPriceModel {
    pub fn final_loss(&self) -> f32 {
        self.outcome.last().map(|m| m.loss).unwrap_or(f32::NAN)
    }

    pub fn final_validation_loss(&self) -> f32 {
        self.model.validation_loss()
    }
}

/// Trains price networks from raw samples
pub struct PriceTrainer<'a> {
    encoder: &'a FeatureEncoder,
    config: &'a PriceConfig,
}

impl<'a> PriceTrainer<'a> {
    pub fn new(encoder: &'a FeatureEncoder, config: &'a PriceConfig) -> Self {
        Self { encoder, config }
    }

    /// Fit a fresh network on `samples`.
    ///
    /// Statistics are computed over the full sample set before the
    /// validation split, so the returned model carries the same statistics
    /// that produced its training inputs.
    pub fn train<R, F>(
        &self,
        samples: &[TrainingSample],
        epochs: Option<usize>,
        rng: &mut R,
        on_epoch: F,
    ) -> Result<TrainedPriceModel>
    where
        R: Rng + ?Sized,
        F: FnMut(&EpochMetrics),
    {
        if samples.len() < MIN_TRAINING_SAMPLES {
            return Err(ModelError::InsufficientData {
                required: MIN_TRAINING_SAMPLES,
                got: samples.len(),
            });
        }

        let dataset = self.encoder.fit(samples);
        let x = dataset.feature_matrix();
        let y = dataset.target_column();
        debug!(
            samples = samples.len(),
            price_min = dataset.stats.price.min,
            price_max = dataset.stats.price.max,
            "Encoded price training set"
        );

        let mut network = Sequential::build(self.config.architecture(), &[FEATURE_COUNT], rng)?;
        let fit_config = FitConfig {
            epochs: epochs.unwrap_or(self.config.epochs),
            batch_size: self.config.batch_size,
            validation_split: self.config.validation_split,
            adam: self.config.adam,
            accuracy: false,
        };

        let outcome = fit(
            &mut network,
            &Mse,
            &x.clone().into_dyn(),
            &y,
            &fit_config,
            rng,
            on_epoch,
        )?;

        let validation_loss = outcome
            .last()
            .and_then(|m| m.validation_loss)
            .unwrap_or(0.0);
        let model = PriceModel::new(network, dataset.stats, validation_loss);

        let importance = feature_importance(&x, |batch| model.predict_deterministic(batch))?;

        info!(
            epochs = outcome.history.len(),
            validation_loss = validation_loss,
            diverged_at_epoch = ?outcome.diverged_at_epoch,
            "Price network trained"
        );

        Ok(TrainedPriceModel {
            model,
            outcome,
            feature_importance: importance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemAttributes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn height_samples(n: usize) -> Vec<TrainingSample> {
        (1..=n)
            .map(|i| {
                TrainingSample::new(
                    ItemAttributes {
                        height: Some(10.0 * i as f32),
                        ..Default::default()
                    },
                    100.0 * i as f32,
                )
            })
            .collect()
    }

    #[test]
    fn test_four_samples_is_insufficient() {
        let encoder = FeatureEncoder::default();
        let config = PriceConfig::default();
        let mut rng = StdRng::seed_from_u64(1);

        let err = PriceTrainer::new(&encoder, &config)
            .train(&height_samples(4), None, &mut rng, |_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::InsufficientData {
                required: 5,
                got: 4
            }
        ));
    }

    #[test]
    fn test_five_samples_trains() {
        let encoder = FeatureEncoder::default();
        let config = PriceConfig::default();
        let mut rng = StdRng::seed_from_u64(1);

        let trained = PriceTrainer::new(&encoder, &config)
            .train(&height_samples(5), None, &mut rng, |_| {})
            .unwrap();

        assert_eq!(trained.outcome.history.len(), 20);
        assert_eq!(trained.feature_importance.len(), FEATURE_COUNT);
        assert!(trained.feature_importance.iter().any(|v| *v == 1.0));
        assert!(trained
            .feature_importance
            .iter()
            .all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(trained.model.stats().price.min, 100.0);
        assert_eq!(trained.model.stats().price.max, 500.0);
    }

    #[test]
    fn test_epoch_override_and_callback() {
        let encoder = FeatureEncoder::default();
        let config = PriceConfig::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut epochs = Vec::new();

        PriceTrainer::new(&encoder, &config)
            .train(&height_samples(6), Some(3), &mut rng, |m| epochs.push(m.epoch))
            .unwrap();
        assert_eq!(epochs, vec![1, 2, 3]);
    }
}
