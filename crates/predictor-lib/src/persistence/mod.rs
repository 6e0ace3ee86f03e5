//! Model persistence layer
//!
//! This module provides:
//! - Atomic writes of the descriptor, weight buffer and statistics files
//! - Checksum validation before a loaded artifact is accepted
//! - Reconstruction of a network from its descriptor
//!
//! Layout under the storage root, per model kind:
//! `{kind}_model.json`, `{kind}_model.weights.bin`, `{kind}_stats.json`.
//! The descriptor is written last and acts as the commit point.

mod descriptor;

pub use descriptor::{
    architecture_checksum, compute_checksum, decode_weights, encode_weights,
    ArchitectureDescriptor, FORMAT_VERSION,
};

use crate::models::ModelKind;
use crate::nn::Sequential;
use crate::registry::ModelStatus;
use crate::{ModelError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A network restored from disk together with its side documents
#[derive(Debug, Clone)]
pub struct StoredModel<S> {
    pub network: Sequential,
    pub stats: S,
    pub status: ModelStatus,
}

/// Reads and writes model artifacts under one directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor_path(&self, kind: ModelKind) -> PathBuf {
        self.root.join(format!("{kind}_model.json"))
    }

    pub fn weights_path(&self, kind: ModelKind) -> PathBuf {
        self.root.join(format!("{kind}_model.weights.bin"))
    }

    pub fn stats_path(&self, kind: ModelKind) -> PathBuf {
        self.root.join(format!("{kind}_stats.json"))
    }

    /// Whether a committed artifact (descriptor and weights) exists
    pub fn has_model(&self, kind: ModelKind) -> bool {
        self.descriptor_path(kind).is_file() && self.weights_path(kind).is_file()
    }

    /// Persist a model. Weights and statistics go first, the descriptor last.
    pub fn save<S: Serialize>(
        &self,
        kind: ModelKind,
        network: &Sequential,
        stats: &S,
        status: &ModelStatus,
    ) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| ModelError::io(&self.root, e))?;

        let weights = encode_weights(&network.flatten_weights());
        let descriptor = ArchitectureDescriptor::describe(kind, network, &weights, status.clone())?;

        let stats_json =
            serde_json::to_vec_pretty(stats).map_err(|source| ModelError::Serialization {
                what: "statistics",
                source,
            })?;
        let descriptor_json =
            serde_json::to_vec_pretty(&descriptor).map_err(|source| ModelError::Serialization {
                what: "architecture descriptor",
                source,
            })?;

        write_atomic(&self.weights_path(kind), &weights)?;
        write_atomic(&self.stats_path(kind), &stats_json)?;
        write_atomic(&self.descriptor_path(kind), &descriptor_json)?;

        info!(
            kind = %kind,
            version = %status.version,
            params = descriptor.param_count,
            checksum = %descriptor.weights_checksum,
            root = %self.root.display(),
            "Model artifact saved"
        );
        Ok(())
    }

    /// Load and validate a model.
    ///
    /// Missing descriptor or weights is `ModelNotInitialized`, missing
    /// statistics is `StatsNotFound`, anything inconsistent is
    /// `ArtifactCorrupt`.
    pub fn load<S: DeserializeOwned>(&self, kind: ModelKind) -> Result<StoredModel<S>> {
        let descriptor_bytes = read_artifact(&self.descriptor_path(kind))?
            .ok_or(ModelError::ModelNotInitialized(kind))?;
        let weights = read_artifact(&self.weights_path(kind))?
            .ok_or(ModelError::ModelNotInitialized(kind))?;

        let descriptor: ArchitectureDescriptor = serde_json::from_slice(&descriptor_bytes)
            .map_err(|e| ModelError::ArtifactCorrupt(format!("unreadable descriptor: {e}")))?;
        descriptor.verify(kind, &weights)?;

        let stats = self.load_stats(kind)?;

        // Initial values are overwritten below
        let mut rng = StdRng::seed_from_u64(0);
        let mut network = Sequential::build(descriptor.layers, &descriptor.input_shape, &mut rng)
            .map_err(|e| ModelError::ArtifactCorrupt(e.to_string()))?;
        if network.param_count() != descriptor.param_count {
            return Err(ModelError::ArtifactCorrupt(format!(
                "rebuilt network has {} parameters, descriptor says {}",
                network.param_count(),
                descriptor.param_count
            )));
        }
        network.assign_weights(&decode_weights(&weights)?)?;

        debug!(
            kind = %kind,
            version = %descriptor.status.version,
            root = %self.root.display(),
            "Model artifact loaded"
        );

        Ok(StoredModel {
            network,
            stats,
            status: descriptor.status,
        })
    }

    /// Read only the statistics document of `kind`.
    pub fn load_stats<S: DeserializeOwned>(&self, kind: ModelKind) -> Result<S> {
        let path = self.stats_path(kind);
        let bytes = read_artifact(&path)?.ok_or(ModelError::StatsNotFound(path))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ModelError::ArtifactCorrupt(format!("unreadable statistics: {e}")))
    }
}

/// `None` when the file does not exist
fn read_artifact(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ModelError::io(path, e)),
    }
}

/// Write to a temp file, sync it and rename it over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path).map_err(|e| ModelError::io(&temp_path, e))?;

    file.write_all(bytes)
        .map_err(|e| ModelError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| ModelError::io(&temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| ModelError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, LayerSpec, Mode};
    use ndarray::ArrayD;
    use tempfile::TempDir;

    fn network(seed: u64) -> Sequential {
        let mut rng = StdRng::seed_from_u64(seed);
        Sequential::build(
            vec![
                LayerSpec::Dense {
                    inputs: 3,
                    units: 4,
                    activation: Activation::Relu,
                    l2: 0.001,
                },
                LayerSpec::BatchNorm {
                    features: 4,
                    momentum: 0.9,
                    epsilon: 1e-3,
                },
                LayerSpec::Dense {
                    inputs: 4,
                    units: 1,
                    activation: Activation::Linear,
                    l2: 0.0,
                },
            ],
            &[3],
            &mut rng,
        )
        .unwrap()
    }

    fn status() -> ModelStatus {
        ModelStatus {
            initialized: true,
            version: "1.0.3".into(),
            ..ModelStatus::default()
        }
    }

    #[test]
    fn test_save_load_round_trip_is_bit_identical() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let net = network(7);

        store
            .save(ModelKind::Price, &net, &vec![1.5f32, 2.5], &status())
            .unwrap();
        assert!(store.has_model(ModelKind::Price));

        let loaded: StoredModel<Vec<f32>> = store.load(ModelKind::Price).unwrap();
        let a: Vec<u32> = net.flatten_weights().iter().map(|w| w.to_bits()).collect();
        let b: Vec<u32> = loaded
            .network
            .flatten_weights()
            .iter()
            .map(|w| w.to_bits())
            .collect();
        assert_eq!(a, b);
        assert_eq!(loaded.stats, vec![1.5, 2.5]);
        assert_eq!(loaded.status, status());

        let mut rng = StdRng::seed_from_u64(0);
        let x = ArrayD::from_elem(vec![1, 3], 0.4f32);
        assert_eq!(
            net.infer(x.clone(), Mode::Deterministic, &mut rng).unwrap(),
            loaded.network.infer(x, Mode::Deterministic, &mut rng).unwrap()
        );
    }

    #[test]
    fn test_missing_files() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());

        assert!(matches!(
            store.load::<Vec<f32>>(ModelKind::Image),
            Err(ModelError::ModelNotInitialized(ModelKind::Image))
        ));

        store
            .save(ModelKind::Image, &network(1), &0u8, &status())
            .unwrap();
        fs::remove_file(store.stats_path(ModelKind::Image)).unwrap();
        assert!(matches!(
            store.load::<u8>(ModelKind::Image),
            Err(ModelError::StatsNotFound(_))
        ));

        fs::remove_file(store.weights_path(ModelKind::Image)).unwrap();
        assert!(matches!(
            store.load::<u8>(ModelKind::Image),
            Err(ModelError::ModelNotInitialized(_))
        ));
    }

    #[test]
    fn test_mismatched_weights_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        store
            .save(ModelKind::Price, &network(1), &0u8, &status())
            .unwrap();

        // Weights of a different network under the same descriptor
        let other = encode_weights(&network(2).flatten_weights());
        fs::write(store.weights_path(ModelKind::Price), other).unwrap();

        assert!(matches!(
            store.load::<u8>(ModelKind::Price),
            Err(ModelError::ArtifactCorrupt(_))
        ));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path().join("nested"));
        store
            .save(ModelKind::Price, &network(1), &0u8, &status())
            .unwrap();

        let leftovers: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
