//! Image category classifier
//!
//! This module provides:
//! - Image decoding, resizing and pixel scaling into channel-first tensors
//! - The convolutional classifier architecture
//! - Training over labelled images and single-image classification

mod classifier;
mod preprocess;

pub use classifier::{ImageTrainer, TrainedImageModel};
pub use preprocess::{image_batch, image_tensor, one_hot, CHANNELS, PIXEL_SCALE};

use crate::nn::{Activation, AdamConfig, LayerSpec, Sequential};
use crate::preprocessing::Vocabulary;
use crate::{ModelError, Result};
use serde::{Deserialize, Serialize};

/// Default side length images are resized to
pub const DEFAULT_IMAGE_SIZE: u32 = 64;

/// Smallest side length that survives three conv + pool stages
pub const MIN_IMAGE_SIZE: u32 = 22;

/// Fewest labelled images the classifier can be trained on
pub const MIN_TRAINING_IMAGES: usize = 2;

const CONV_FILTERS: [usize; 3] = [32, 64, 64];
const KERNEL: usize = 3;
const POOL: usize = 2;
const HIDDEN_UNITS: usize = 64;

/// Image classifier hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub image_size: u32,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f32,
    pub dropout: f32,
    pub adam: AdamConfig,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            epochs: 10,
            batch_size: 8,
            validation_split: 0.2,
            dropout: 0.5,
            adam: AdamConfig::default(),
        }
    }
}

/// Preprocessing parameters a trained classifier depends on.
///
/// Persisted as the image model's statistics document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStats {
    pub image_size: u32,
    pub pixel_scale: f32,
    pub categories: Vocabulary,
}

impl ImageStats {
    pub fn input_shape(&self) -> Vec<usize> {
        let side = self.image_size as usize;
        vec![CHANNELS, side, side]
    }

    /// Three `conv → pool` stages, flatten, a dropout-regularized hidden
    /// layer and a softmax over the categories.
    pub fn architecture(&self, dropout: f32) -> Result<Vec<LayerSpec>> {
        if self.categories.is_empty() {
            return Err(ModelError::InvalidArchitecture(
                "image classifier needs at least one category".to_string(),
            ));
        }
        if self.image_size < MIN_IMAGE_SIZE {
            return Err(ModelError::InvalidArchitecture(format!(
                "image size {} is below the minimum of {MIN_IMAGE_SIZE}",
                self.image_size
            )));
        }

        let mut specs = Vec::with_capacity(12);
        let mut channels = CHANNELS;
        for filters in CONV_FILTERS {
            specs.push(LayerSpec::Conv2d {
                in_channels: channels,
                filters,
                kernel: KERNEL,
                activation: Activation::Relu,
            });
            specs.push(LayerSpec::MaxPool2d { size: POOL });
            channels = filters;
        }
        specs.push(LayerSpec::Flatten);

        let mut shape = self.input_shape();
        for spec in &specs {
            shape = spec.output_shape(&shape)?;
        }
        let flat = shape.iter().product();

        specs.extend([
            LayerSpec::Dense {
                inputs: flat,
                units: HIDDEN_UNITS,
                activation: Activation::Relu,
                l2: 0.0,
            },
            LayerSpec::Dropout { rate: dropout },
            LayerSpec::Dense {
                inputs: HIDDEN_UNITS,
                units: self.categories.len(),
                activation: Activation::Softmax,
                l2: 0.0,
            },
        ]);
        Ok(specs)
    }
}

/// A trained classifier and the preprocessing it expects
#[derive(Debug, Clone)]
pub struct ImageModel {
    network: Sequential,
    stats: ImageStats,
}

impl ImageModel {
    pub fn new(network: Sequential, stats: ImageStats) -> Self {
        Self { network, stats }
    }

    pub fn network(&self) -> &Sequential {
        &self.network
    }

    pub fn stats(&self) -> &ImageStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(size: u32) -> ImageStats {
        ImageStats {
            image_size: size,
            pixel_scale: PIXEL_SCALE,
            categories: Vocabulary::default_categories(),
        }
    }

    #[test]
    fn test_default_architecture_flattens_to_2304() {
        let specs = stats(64).architecture(0.5).unwrap();
        // 64 -> 62 -> 31 -> 29 -> 14 -> 12 -> 6; 64 filters * 6 * 6
        assert!(specs.contains(&LayerSpec::Dense {
            inputs: 2304,
            units: HIDDEN_UNITS,
            activation: Activation::Relu,
            l2: 0.0,
        }));
        assert_eq!(specs.len(), 10);
    }

    #[test]
    fn test_minimum_image_size() {
        assert!(stats(MIN_IMAGE_SIZE).architecture(0.5).is_ok());
        assert!(stats(MIN_IMAGE_SIZE - 1).architecture(0.5).is_err());
    }

    #[test]
    fn test_stats_document_shape() {
        let json = serde_json::to_value(stats(32)).unwrap();
        assert_eq!(json["image_size"], 32);
        assert_eq!(json["categories"][0], "furniture");
    }
}
