//! Appraisal predictor CLI
//!
//! A command-line tool for training, querying and importing the
//! appraisal platform's price and image models.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{models, predict, train};
use predictor_lib::{ModelKind, ModelService};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Appraisal predictor CLI
#[derive(Parser)]
#[command(name = "apx")]
#[command(author, version, about = "CLI for the Appraisal Predictive Modeling Service", long_about = None)]
pub struct Cli {
    /// Model storage directory (can also be set via APX_STORAGE_DIR env var)
    #[arg(long, env = "APX_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Seed for reproducible training and predictions
    #[arg(long, env = "APX_SEED")]
    pub seed: Option<u64>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the status of the price and image models
    Info,

    /// Train a model
    #[command(subcommand)]
    Train(TrainCommands),

    /// Predict prices for items
    Predict {
        /// JSON file with one item or an array of items
        #[arg(long, short)]
        items: PathBuf,
    },

    /// Classify an image into a category
    Classify {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,
    },

    /// Import a persisted model from another directory
    Load {
        /// Model type (price or image)
        kind: ModelKind,

        /// Directory holding the model artifacts
        dir: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum TrainCommands {
    /// Train the price regressor
    Price {
        /// JSON file with training samples
        #[arg(long, short)]
        samples: PathBuf,

        /// Number of epochs (defaults to the configured value)
        #[arg(long, short)]
        epochs: Option<usize>,
    },

    /// Train the image classifier
    Image {
        /// JSON manifest of {"path", "category"} entries
        #[arg(long, short)]
        manifest: PathBuf,

        /// Number of epochs (defaults to the configured value)
        #[arg(long, short)]
        epochs: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays parseable
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let file_config = config::Config::load()?;
    let service_config = file_config.service_config(cli.storage_dir, cli.seed);
    debug!(
        storage_dir = %service_config.storage_dir.display(),
        seed = ?service_config.seed,
        "CLI configured"
    );
    let service = ModelService::new(service_config).context("Invalid model configuration")?;

    // Execute command
    match cli.command {
        Commands::Info => {
            models::show_info(&service, cli.format).await?;
        }
        Commands::Train(train_cmd) => match train_cmd {
            TrainCommands::Price { samples, epochs } => {
                train::train_price(&service, &samples, epochs, cli.format).await?;
            }
            TrainCommands::Image { manifest, epochs } => {
                train::train_image(&service, &manifest, epochs, cli.format).await?;
            }
        },
        Commands::Predict { items } => {
            predict::predict_prices(&service, &items, cli.format).await?;
        }
        Commands::Classify { image } => {
            predict::classify(&service, &image, cli.format).await?;
        }
        Commands::Load { kind, dir } => {
            models::load_model(&service, kind, &dir, cli.format).await?;
        }
    }

    Ok(())
}
