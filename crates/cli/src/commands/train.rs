//! Training commands

use anyhow::{Context, Result};
use colored::Colorize;
use predictor_lib::{
    ImageSample, ModelService, ProgressEvent, TrainingReport, TrainingSample, FEATURE_NAMES,
};
use serde::Deserialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use tabled::Tabled;
use tokio::sync::broadcast::{self, error::RecvError};

use super::read_records;
use crate::output::{
    format_loss, print_info, print_json, print_success, print_table, print_warning, OutputFormat,
};

/// One labelled image in a training manifest
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    /// Image file, relative to the manifest's directory
    path: PathBuf,
    category: String,
}

/// Row for the epoch history table
#[derive(Tabled)]
struct EpochRow {
    #[tabled(rename = "Epoch")]
    epoch: usize,
    #[tabled(rename = "Loss")]
    loss: String,
    #[tabled(rename = "Val Loss")]
    validation_loss: String,
    #[tabled(rename = "Val Acc")]
    validation_accuracy: String,
}

/// Row for the feature importance table
#[derive(Tabled)]
struct ImportanceRow {
    #[tabled(rename = "Feature")]
    feature: String,
    #[tabled(rename = "Importance")]
    importance: String,
}

/// Train the price model from a JSON file of samples
pub async fn train_price(
    service: &ModelService,
    samples_path: &Path,
    epochs: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let samples: Vec<TrainingSample> = read_records(samples_path)?;
    if format == OutputFormat::Table {
        print_info(&format!(
            "Training price model on {} samples from {}",
            samples.len(),
            samples_path.display()
        ));
    }

    let progress = service.subscribe_progress();
    let report = follow_progress(progress, format, service.train_price_model(samples, epochs))
        .await
        .context("Price model training failed")?;

    print_report(&report, format)
}

/// Train the image classifier from a JSON manifest of labelled images
pub async fn train_image(
    service: &ModelService,
    manifest_path: &Path,
    epochs: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let samples = read_manifest(manifest_path)?;
    if format == OutputFormat::Table {
        print_info(&format!(
            "Training image classifier on {} images from {}",
            samples.len(),
            manifest_path.display()
        ));
    }

    let progress = service.subscribe_progress();
    let report = follow_progress(progress, format, service.train_image_model(samples, epochs))
        .await
        .context("Image model training failed")?;

    print_report(&report, format)
}

fn read_manifest(manifest_path: &Path) -> Result<Vec<ImageSample>> {
    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let entries: Vec<ManifestEntry> = read_records(manifest_path)?;

    entries
        .into_iter()
        .map(|entry| {
            let path = base.join(&entry.path);
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            ImageSample::from_bytes(&bytes, entry.category)
                .with_context(|| format!("Failed to decode image {}", path.display()))
        })
        .collect()
}

/// Drive `training` to completion, printing epoch events as they arrive
async fn follow_progress<F>(
    mut progress: broadcast::Receiver<ProgressEvent>,
    format: OutputFormat,
    training: F,
) -> predictor_lib::Result<TrainingReport>
where
    F: Future<Output = predictor_lib::Result<TrainingReport>>,
{
    tokio::pin!(training);
    loop {
        tokio::select! {
            result = &mut training => {
                while let Ok(event) = progress.try_recv() {
                    print_event(&event, format);
                }
                return result;
            }
            event = progress.recv() => match event {
                Ok(event) => print_event(&event, format),
                Err(RecvError::Lagged(_)) => continue,
                // Sender outlives the training future; keep waiting on it alone
                Err(RecvError::Closed) => return training.await,
            },
        }
    }
}

fn print_event(event: &ProgressEvent, format: OutputFormat) {
    if format != OutputFormat::Table {
        return;
    }
    match event {
        ProgressEvent::Epoch { metrics, .. } => {
            let validation = metrics
                .validation_loss
                .map(format_loss)
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {:>3}  loss {}  val_loss {}",
                "epoch".dimmed(),
                metrics.epoch,
                format_loss(metrics.loss),
                validation
            );
        }
        ProgressEvent::Diverged { epoch, .. } => {
            print_warning(&format!("Loss diverged at epoch {epoch}"));
        }
        ProgressEvent::Started { .. } | ProgressEvent::Completed { .. } => {}
    }
}

fn print_report(report: &TrainingReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Table => {
            let rows: Vec<EpochRow> = report
                .history
                .iter()
                .map(|m| EpochRow {
                    epoch: m.epoch,
                    loss: format_loss(m.loss),
                    validation_loss: m
                        .validation_loss
                        .map(format_loss)
                        .unwrap_or_else(|| "-".to_string()),
                    validation_accuracy: m
                        .validation_accuracy
                        .map(|a| format!("{:.1}%", a * 100.0))
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            print_table(rows);

            if report.feature_importance.len() == FEATURE_NAMES.len() {
                let rows: Vec<ImportanceRow> = FEATURE_NAMES
                    .iter()
                    .zip(&report.feature_importance)
                    .map(|(name, value)| ImportanceRow {
                        feature: name.to_string(),
                        importance: format!("{:.3}", value),
                    })
                    .collect();
                print_table(rows);
            }

            if let Some(epoch) = report.diverged_at_epoch {
                print_warning(&format!(
                    "Training stopped at epoch {epoch}; weights from the last finite epoch were kept"
                ));
            }
            print_success(&format!(
                "Trained {} model {} on {} samples in {} ms (val loss {})",
                report.model,
                report.version,
                report.sample_count,
                report.duration_ms,
                format_loss(report.final_validation_loss)
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_paths_are_relative_to_manifest() {
        let dir = TempDir::new().unwrap();
        let mut png = Vec::new();
        image::DynamicImage::new_rgb8(4, 4)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        std::fs::create_dir(dir.path().join("img")).unwrap();
        std::fs::write(dir.path().join("img/a.png"), &png).unwrap();

        let manifest = dir.path().join("manifest.json");
        std::fs::write(&manifest, r#"[{"path": "img/a.png", "category": "art"}]"#).unwrap();

        let samples = read_manifest(&manifest).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].category, "art");
    }

    #[test]
    fn test_manifest_missing_image() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(&manifest, r#"[{"path": "nope.png", "category": "art"}]"#).unwrap();

        let err = read_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("nope.png"));
    }
}
