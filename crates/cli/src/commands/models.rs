//! Model status and import commands

use anyhow::{Context, Result};
use predictor_lib::{ModelKind, ModelService};
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_state, format_loss, format_timestamp, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

/// Row for the model status table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Last Trained")]
    last_trained: String,
    #[tabled(rename = "Train Loss")]
    training_loss: String,
    #[tabled(rename = "Val Loss")]
    validation_loss: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
}

/// Show the status of both models in the storage root
pub async fn show_info(service: &ModelService, format: OutputFormat) -> Result<()> {
    let warm = service.warm_start().await;
    let info = service.get_model_info().await;

    match format {
        OutputFormat::Json => print_json(&info)?,
        OutputFormat::Table => {
            let mut rows = Vec::with_capacity(ModelKind::ALL.len());
            for kind in ModelKind::ALL {
                let status = info.get(kind);
                let performance = status.performance.as_ref();
                rows.push(ModelRow {
                    model: kind.to_string(),
                    state: color_state(service.state_label(kind).await),
                    version: status.version.clone(),
                    last_trained: format_timestamp(status.last_trained.as_ref()),
                    training_loss: performance
                        .map(|p| format_loss(p.training_loss))
                        .unwrap_or_else(|| "-".to_string()),
                    validation_loss: performance
                        .map(|p| format_loss(p.validation_loss))
                        .unwrap_or_else(|| "-".to_string()),
                    accuracy: performance
                        .and_then(|p| p.accuracy)
                        .map(|a| format!("{:.1}%", a * 100.0))
                        .unwrap_or_else(|| "-".to_string()),
                });
            }
            print_table(rows);

            for (kind, reason) in &warm.failed {
                print_warning(&format!("{kind} model artifact is unusable: {reason}"));
            }
        }
    }

    Ok(())
}

/// Import a model from another directory into the storage root
pub async fn load_model(
    service: &ModelService,
    kind: ModelKind,
    dir: &Path,
    format: OutputFormat,
) -> Result<()> {
    let status = service
        .load_model(kind, dir)
        .await
        .with_context(|| format!("Failed to load {kind} model from {}", dir.display()))?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => print_success(&format!(
            "Loaded {kind} model {} from {} into {}",
            status.version,
            dir.display(),
            service.store().root().display()
        )),
    }

    Ok(())
}
