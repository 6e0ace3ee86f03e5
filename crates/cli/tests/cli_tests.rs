//! CLI integration tests

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run `apx` against an isolated storage root and config file
fn apx(storage: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_apx"))
        .args(args)
        .env("APX_STORAGE_DIR", storage)
        .env("APX_CONFIG", storage.join("no-config.json"))
        .env("APX_SEED", "17")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn write_samples(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("samples.json");
    let samples: Vec<serde_json::Value> = (1..=6)
        .map(|i| {
            serde_json::json!({
                "height": i as f32 * 10.0,
                "category": "art",
                "condition": "good",
                "estimatedValue": i as f32 * 100.0,
            })
        })
        .collect();
    std::fs::write(&path, serde_json::to_string(&samples).unwrap()).unwrap();
    path
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    let output = apx(dir.path(), &["--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Appraisal Predictive Modeling Service"),
        "Should show app name"
    );
    for command in ["info", "train", "predict", "classify", "load"] {
        assert!(stdout.contains(command), "Should show {command} command");
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    let output = apx(dir.path(), &["--version"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("apx"), "Should show binary name");
}

/// Test train price subcommand help
#[test]
fn test_train_price_help() {
    let dir = TempDir::new().unwrap();
    let output = apx(dir.path(), &["train", "price", "--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--samples"), "Should show samples option");
    assert!(stdout.contains("--epochs"), "Should show epochs option");
}

/// Test info on an empty storage root
#[test]
fn test_info_json_on_empty_storage() {
    let dir = TempDir::new().unwrap();
    let output = apx(dir.path(), &["--format", "json", "info"]);

    assert!(output.status.success(), "info should succeed");
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["priceModel"]["version"], "1.0.0");
    assert_eq!(info["priceModel"]["initialized"], false);
    assert_eq!(info["imageModel"]["initialized"], false);
}

/// Test that predicting before training fails with a clear error
#[test]
fn test_predict_before_training_fails() {
    let dir = TempDir::new().unwrap();
    let items = dir.path().join("items.json");
    std::fs::write(&items, r#"{"height": 25.0}"#).unwrap();

    let output = apx(
        dir.path(),
        &["predict", "--items", items.to_str().unwrap()],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not initialized"), "stderr was: {stderr}");
}

/// Test that an unknown model type is rejected by argument parsing
#[test]
fn test_load_rejects_unknown_kind() {
    let dir = TempDir::new().unwrap();
    let output = apx(dir.path(), &["load", "text", dir.path().to_str().unwrap()]);

    assert!(!output.status.success());
}

/// Train, predict and inspect through the binary
#[test]
fn test_train_then_predict_end_to_end() {
    let dir = TempDir::new().unwrap();
    let samples = write_samples(dir.path());

    let output = apx(
        dir.path(),
        &[
            "--format",
            "json",
            "train",
            "price",
            "--samples",
            samples.to_str().unwrap(),
            "--epochs",
            "3",
        ],
    );
    assert!(
        output.status.success(),
        "train failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["version"], "1.0.1");
    assert_eq!(report["history"].as_array().unwrap().len(), 3);

    let items = dir.path().join("items.json");
    std::fs::write(&items, r#"[{"height": 25.0}, {"height": 45.0, "category": "art"}]"#).unwrap();
    let output = apx(
        dir.path(),
        &["--format", "json", "predict", "--items", items.to_str().unwrap()],
    );
    assert!(output.status.success());
    let predictions: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let predictions = predictions.as_array().unwrap();
    assert_eq!(predictions.len(), 2);
    for p in predictions {
        let value = p["predicted_value"].as_f64().unwrap();
        assert!((100.0..=600.0).contains(&value));
    }

    let output = apx(dir.path(), &["--format", "json", "info"]);
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["priceModel"]["version"], "1.0.1");
    assert_eq!(info["priceModel"]["initialized"], true);
}
