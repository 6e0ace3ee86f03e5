//! Service configuration

use anyhow::{Context, Result};
use predictor_lib::ModelServiceConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "APPRAISAL_CONFIG";

/// Prefix of environment overrides, e.g. `APPRAISAL_API_PORT=9000` or
/// `APPRAISAL_MODEL__STORAGE_DIR=/data/models`
const ENV_PREFIX: &str = "APPRAISAL";

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// API server port for health/status/metrics
    pub api_port: u16,

    /// Name attached to lifecycle log events
    pub instance: String,

    /// Model service settings (storage root, hyperparameters, seed)
    pub model: ModelServiceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_port: 8080,
            instance: default_instance(),
            model: ModelServiceConfig::default(),
        }
    }
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "appraisal-predictor".to_string())
}

impl ServiceConfig {
    /// Load configuration from the file named by `APPRAISAL_CONFIG` (if
    /// set) and `APPRAISAL_*` environment variables.
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::from_sources(file.as_deref())
    }

    /// Environment values override file values, which override defaults.
    pub fn from_sources(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read service configuration")?;

        let config: ServiceConfig = settings
            .try_deserialize()
            .context("Invalid service configuration")?;
        config
            .model
            .validate()
            .context("Invalid model service configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.model.storage_dir, PathBuf::from("./models"));
        assert!(config.model.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_port = 9100

[model]
storage_dir = "/var/lib/appraisal/models"
seed = 11

[model.price]
epochs = 40
"#
        )
        .unwrap();

        let config = ServiceConfig::from_sources(Some(file.path())).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(
            config.model.storage_dir,
            PathBuf::from("/var/lib/appraisal/models")
        );
        assert_eq!(config.model.seed, Some(11));
        assert_eq!(config.model.price.epochs, 40);
        assert_eq!(config.model.price.batch_size, 8);
    }

    #[test]
    fn test_invalid_model_settings_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[model.image]\nimage_size = 8").unwrap();

        assert!(ServiceConfig::from_sources(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(ServiceConfig::from_sources(Some(Path::new("/nonexistent/appraisal.toml"))).is_err());
    }
}
