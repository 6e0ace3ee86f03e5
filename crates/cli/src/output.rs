//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format confidence as percentage
pub fn format_confidence(confidence: f32) -> String {
    format!("{:.0}%", confidence * 100.0)
}

/// Format a price with two decimals
pub fn format_price(value: f32) -> String {
    format!("{:.2}", value)
}

/// Format a loss value; non-finite values are shown as a dash
pub fn format_loss(loss: f32) -> String {
    if loss.is_finite() {
        format!("{:.5}", loss)
    } else {
        "-".to_string()
    }
}

/// Format an optional timestamp for display
pub fn format_timestamp(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

/// Color a model slot state
pub fn color_state(state: &str) -> String {
    match state {
        "ready" => state.green().to_string(),
        "training" => state.blue().to_string(),
        "uninitialized" => state.yellow().to_string(),
        _ => state.to_string(),
    }
}

/// Color confidence based on value
pub fn color_confidence(confidence: f32) -> String {
    let formatted = format_confidence(confidence);
    if confidence >= 0.8 {
        formatted.green().to_string()
    } else if confidence >= 0.6 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_confidence() {
        assert_eq!(format_confidence(0.856), "86%");
        assert_eq!(format_confidence(0.0), "0%");
    }

    #[test]
    fn test_format_loss_hides_non_finite() {
        assert_eq!(format_loss(0.125), "0.12500");
        assert_eq!(format_loss(f32::NAN), "-");
    }

    #[test]
    fn test_format_timestamp_never() {
        assert_eq!(format_timestamp(None), "never");
    }
}
