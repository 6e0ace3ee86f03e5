use super::{image_batch, image_tensor, one_hot, ImageConfig, ImageModel, ImageStats};
use super::{MIN_TRAINING_IMAGES, PIXEL_SCALE};
use crate::models::{Classification, EpochMetrics, ImageSample};
use crate::nn::{fit, CategoricalCrossEntropy, FitConfig, FitOutcome, Mode, Sequential};
use crate::preprocessing::Vocabulary;
use crate::{ModelError, Result};
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Result of a successful classifier training run
#[derive(Debug, Clone)]
pub struct TrainedImageModel {
    pub model: ImageModel,
    pub outcome: FitOutcome,
}

impl TrainedImageModel {
    pub fn final_loss(&self) -> f32 {
        self.outcome.last().map(|m| m.loss).unwrap_or(f32::NAN)
    }

    pub fn final_validation_loss(&self) -> f32 {
        self.outcome
            .last()
            .and_then(|m| m.validation_loss)
            .unwrap_or(0.0)
    }

    pub fn final_validation_accuracy(&self) -> Option<f32> {
        self.outcome.last().and_then(|m| m.validation_accuracy)
    }
}

/// Trains image classifiers over a fixed category vocabulary
pub struct ImageTrainer<'a> {
    config: &'a ImageConfig,
    categories: &'a Vocabulary,
}

impl<'a> ImageTrainer<'a> {
    pub fn new(config: &'a ImageConfig, categories: &'a Vocabulary) -> Self {
        Self { config, categories }
    }

    /// Fit a fresh classifier on `samples`.
    ///
    /// Every label must belong to the vocabulary; the first unknown one
    /// aborts with `UnknownLabel` before any training happens.
    pub fn train<R, F>(
        &self,
        samples: &[ImageSample],
        epochs: Option<usize>,
        rng: &mut R,
        on_epoch: F,
    ) -> Result<TrainedImageModel>
    where
        R: Rng + ?Sized,
        F: FnMut(&EpochMetrics),
    {
        if samples.len() < MIN_TRAINING_IMAGES {
            return Err(ModelError::InsufficientData {
                required: MIN_TRAINING_IMAGES,
                got: samples.len(),
            });
        }

        let stats = ImageStats {
            image_size: self.config.image_size,
            pixel_scale: PIXEL_SCALE,
            categories: self.categories.clone(),
        };
        let specs = stats.architecture(self.config.dropout)?;

        let labels: Vec<&str> = samples.iter().map(|s| s.category.as_str()).collect();
        let y = one_hot(&labels, &stats.categories)?;
        let x = image_batch(
            samples.iter().map(|s| &s.image),
            stats.image_size,
            stats.pixel_scale,
        )
        .into_dyn();
        debug!(
            samples = samples.len(),
            image_size = stats.image_size,
            categories = stats.categories.len(),
            "Prepared image training set"
        );

        let mut network = Sequential::build(specs, &stats.input_shape(), rng)?;
        let fit_config = FitConfig {
            epochs: epochs.unwrap_or(self.config.epochs),
            batch_size: self.config.batch_size,
            validation_split: self.config.validation_split,
            adam: self.config.adam,
            accuracy: true,
        };

        let outcome = fit(
            &mut network,
            &CategoricalCrossEntropy,
            &x,
            &y,
            &fit_config,
            rng,
            on_epoch,
        )?;

        info!(
            epochs = outcome.history.len(),
            validation_accuracy = ?outcome.last().and_then(|m| m.validation_accuracy),
            diverged_at_epoch = ?outcome.diverged_at_epoch,
            "Image classifier trained"
        );

        Ok(TrainedImageModel {
            model: ImageModel::new(network, stats),
            outcome,
        })
    }
}

impl ImageModel {
    /// Single deterministic pass; the arg-max category and its probability.
    pub fn classify(&self, image: &DynamicImage) -> Result<Classification> {
        let stats = self.stats();
        let x = image_tensor(image, stats.image_size, stats.pixel_scale)
            .insert_axis(ndarray::Axis(0))
            .into_dyn();

        // Deterministic passes never draw from the rng
        let mut rng = StdRng::seed_from_u64(0);
        let probs = self.network().infer(x, Mode::Deterministic, &mut rng)?;

        let (index, confidence) = probs
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        let category = stats.categories.get(index).ok_or_else(|| {
            ModelError::InvalidArchitecture(format!(
                "classifier output {index} has no category"
            ))
        })?;

        Ok(Classification {
            category: category.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    /// Decode an encoded image (PNG, JPEG, ...) and classify it.
    pub fn classify_bytes(&self, bytes: &[u8]) -> Result<Classification> {
        let image = image::load_from_memory(bytes)?;
        self.classify(&image)
    }
}
