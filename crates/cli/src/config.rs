//! Configuration management for the CLI

use anyhow::{Context, Result};
use predictor_lib::ModelServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the config file location
pub const CONFIG_PATH_ENV: &str = "APX_CONFIG";

const DEFAULT_STORAGE_DIR: &str = "./models";

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Model storage root
    pub storage_dir: Option<PathBuf>,
    /// Seed for reproducible training and predictions
    pub seed: Option<u64>,
    /// Hyperparameters and vocabularies; defaults when absent
    pub service: Option<ModelServiceConfig>,
}

impl Config {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("apx").join("config.json"))
    }

    /// Combine the file with command-line values; flags win.
    pub fn service_config(
        &self,
        storage_dir: Option<PathBuf>,
        seed: Option<u64>,
    ) -> ModelServiceConfig {
        let mut config = self.service.clone().unwrap_or_default();
        config.storage_dir = storage_dir
            .or_else(|| self.storage_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
        config.seed = seed.or(self.seed).or(config.seed);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        let service = config.service_config(None, None);
        assert_eq!(service.storage_dir, PathBuf::from(DEFAULT_STORAGE_DIR));
        assert!(service.seed.is_none());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"storage_dir": "/srv/models", "seed": 5, "service": {"price": {"epochs": 7}}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        let from_file = config.service_config(None, None);
        assert_eq!(from_file.storage_dir, PathBuf::from("/srv/models"));
        assert_eq!(from_file.seed, Some(5));
        assert_eq!(from_file.price.epochs, 7);

        let overridden = config.service_config(Some(PathBuf::from("/tmp/m")), Some(9));
        assert_eq!(overridden.storage_dir, PathBuf::from("/tmp/m"));
        assert_eq!(overridden.seed, Some(9));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
