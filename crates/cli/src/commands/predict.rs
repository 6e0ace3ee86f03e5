//! Prediction and classification commands

use anyhow::{Context, Result};
use predictor_lib::{ItemAttributes, ModelService};
use std::path::Path;
use tabled::Tabled;

use super::read_records;
use crate::output::{
    color_confidence, format_price, print_json, print_table, print_warning, OutputFormat,
};

/// Row for the price predictions table
#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Predicted")]
    predicted: String,
    #[tabled(rename = "Low")]
    low: String,
    #[tabled(rename = "High")]
    high: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
}

/// Row for an image classification
#[derive(Tabled)]
struct ClassificationRow {
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
}

/// Predict prices for the items in a JSON file
pub async fn predict_prices(
    service: &ModelService,
    items_path: &Path,
    format: OutputFormat,
) -> Result<()> {
    let items: Vec<ItemAttributes> = read_records(items_path)?;
    let results = service
        .predict_price(&items)
        .await
        .context("Price prediction failed")?;

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Table => {
            if results.is_empty() {
                print_warning("No items to predict");
                return Ok(());
            }
            let rows: Vec<PredictionRow> = results
                .iter()
                .enumerate()
                .map(|(i, r)| PredictionRow {
                    index: i + 1,
                    predicted: format_price(r.predicted_value),
                    low: format_price(r.range.low),
                    high: format_price(r.range.high),
                    confidence: color_confidence(r.confidence),
                })
                .collect();
            print_table(rows);
        }
    }

    Ok(())
}

/// Classify one encoded image file
pub async fn classify(
    service: &ModelService,
    image_path: &Path,
    format: OutputFormat,
) -> Result<()> {
    let bytes = std::fs::read(image_path)
        .with_context(|| format!("Failed to read image {}", image_path.display()))?;
    let classification = service
        .classify_image(&bytes)
        .await
        .context("Image classification failed")?;

    match format {
        OutputFormat::Json => print_json(&classification)?,
        OutputFormat::Table => print_table(vec![ClassificationRow {
            image: image_path.display().to_string(),
            category: classification.category.clone(),
            confidence: color_confidence(classification.confidence),
        }]),
    }

    Ok(())
}
