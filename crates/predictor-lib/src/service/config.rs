use crate::preprocessing::Vocabularies;
use crate::price::{PredictorConfig, PriceConfig};
use crate::vision::{ImageConfig, MIN_IMAGE_SIZE};
use crate::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything a [`super::ModelService`] is parameterized by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelServiceConfig {
    /// Directory holding the model artifacts
    pub storage_dir: PathBuf,
    pub vocabularies: Vocabularies,
    pub price: PriceConfig,
    pub image: ImageConfig,
    pub predictor: PredictorConfig,
    /// Seed for weight init, shuffling and dropout; OS entropy when unset
    pub seed: Option<u64>,
}

impl Default for ModelServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./models"),
            vocabularies: Vocabularies::default(),
            price: PriceConfig::default(),
            image: ImageConfig::default(),
            predictor: PredictorConfig::default(),
            seed: None,
        }
    }
}

impl ModelServiceConfig {
    /// Config rooted at `storage_dir` with every other value defaulted
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    /// Reject values the trainers cannot work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ModelError::InvalidConfig(msg));

        if self.storage_dir.as_os_str().is_empty() {
            return invalid("storage_dir must not be empty".to_string());
        }
        if self.vocabularies.category.is_empty() {
            return invalid("category vocabulary must not be empty".to_string());
        }

        for (name, epochs, batch, split) in [
            (
                "price",
                self.price.epochs,
                self.price.batch_size,
                self.price.validation_split,
            ),
            (
                "image",
                self.image.epochs,
                self.image.batch_size,
                self.image.validation_split,
            ),
        ] {
            if epochs == 0 {
                return invalid(format!("{name}.epochs must be at least 1"));
            }
            if batch == 0 {
                return invalid(format!("{name}.batch_size must be at least 1"));
            }
            if !(split > 0.0 && split < 1.0) {
                return invalid(format!(
                    "{name}.validation_split must be in (0, 1), got {split}"
                ));
            }
        }

        for (name, rate) in [
            ("price.dropout", self.price.dropout),
            ("image.dropout", self.image.dropout),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return invalid(format!("{name} must be in [0, 1), got {rate}"));
            }
        }

        if self.price.l2 < 0.0 {
            return invalid(format!("price.l2 must not be negative, got {}", self.price.l2));
        }
        if self.image.image_size < MIN_IMAGE_SIZE {
            return invalid(format!(
                "image.image_size must be at least {MIN_IMAGE_SIZE}, got {}",
                self.image.image_size
            ));
        }
        if self.predictor.mc_samples == 0 {
            return invalid("predictor.mc_samples must be at least 1".to_string());
        }
        if self.predictor.range_sigmas < 0.0 {
            return invalid("predictor.range_sigmas must not be negative".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ModelServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.price.epochs, 20);
        assert_eq!(config.image.epochs, 10);
        assert_eq!(config.predictor.mc_samples, 10);
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ModelServiceConfig::default();
        config.image.image_size = 16;
        assert!(matches!(
            config.validate(),
            Err(ModelError::InvalidConfig(_))
        ));

        let mut config = ModelServiceConfig::default();
        config.price.validation_split = 1.0;
        assert!(config.validate().is_err());

        let mut config = ModelServiceConfig::default();
        config.predictor.mc_samples = 0;
        assert!(config.validate().is_err());

        let mut config = ModelServiceConfig::default();
        config.image.dropout = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ModelServiceConfig =
            serde_json::from_str(r#"{"storage_dir": "/tmp/m", "seed": 7, "price": {"epochs": 5}}"#)
                .unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/m"));
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.price.epochs, 5);
        assert_eq!(config.price.batch_size, 8);
        assert_eq!(config.image, ImageConfig::default());
    }
}
