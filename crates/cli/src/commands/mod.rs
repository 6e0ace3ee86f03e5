//! CLI command implementations

pub mod models;
pub mod predict;
pub mod train;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

/// A JSON document holding either one record or an array of them
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// Read a JSON file of records; a single object counts as one record
fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records: OneOrMany<T> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(match records {
        OneOrMany::Many(records) => records,
        OneOrMany::One(record) => vec![record],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use predictor_lib::ItemAttributes;
    use tempfile::TempDir;

    #[test]
    fn test_read_records_accepts_object_or_array() {
        let dir = TempDir::new().unwrap();
        let one = dir.path().join("one.json");
        let many = dir.path().join("many.json");
        std::fs::write(&one, r#"{"height": 3.0}"#).unwrap();
        std::fs::write(&many, r#"[{"height": 3.0}, {"rarity": "rare"}]"#).unwrap();

        let records: Vec<ItemAttributes> = read_records(&one).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].height, Some(3.0));

        let records: Vec<ItemAttributes> = read_records(&many).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].rarity.as_deref(), Some("rare"));
    }
}
