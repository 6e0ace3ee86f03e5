//! Architecture descriptor and weight buffer encoding

use crate::models::ModelKind;
use crate::nn::{LayerSpec, Sequential};
use crate::registry::ModelStatus;
use crate::{ModelError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Descriptor layout version; bumped on incompatible changes
pub const FORMAT_VERSION: u32 = 1;

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Human-readable half of a model artifact.
///
/// Carries everything needed to rebuild the network and to check that a
/// weight buffer belongs to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureDescriptor {
    pub format_version: u32,
    pub kind: ModelKind,
    /// Per-sample input shape
    pub input_shape: Vec<usize>,
    pub layers: Vec<LayerSpec>,
    /// Number of `f32` values in the weight buffer
    pub param_count: usize,
    /// SHA-256 of the canonical layer JSON
    pub architecture_checksum: String,
    /// SHA-256 of the weight buffer
    pub weights_checksum: String,
    /// Status at save time; restored on load
    pub status: ModelStatus,
}

impl ArchitectureDescriptor {
    /// Describe `network` and its encoded weights.
    pub fn describe(
        kind: ModelKind,
        network: &Sequential,
        weights: &[u8],
        status: ModelStatus,
    ) -> Result<Self> {
        Ok(Self {
            format_version: FORMAT_VERSION,
            kind,
            input_shape: network.input_shape().to_vec(),
            layers: network.specs().to_vec(),
            param_count: network.param_count(),
            architecture_checksum: architecture_checksum(network.specs())?,
            weights_checksum: compute_checksum(weights),
            status,
        })
    }

    /// Check the descriptor against the expected kind and a weight buffer.
    pub fn verify(&self, kind: ModelKind, weights: &[u8]) -> Result<()> {
        let corrupt = |msg: String| Err(ModelError::ArtifactCorrupt(msg));

        if self.format_version != FORMAT_VERSION {
            return corrupt(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                self.format_version
            ));
        }
        if self.kind != kind {
            return corrupt(format!("descriptor is for {} model, not {kind}", self.kind));
        }

        let computed = architecture_checksum(&self.layers)?;
        if computed != self.architecture_checksum {
            return corrupt(format!(
                "architecture checksum mismatch: expected {}, got {computed}",
                self.architecture_checksum
            ));
        }

        if weights.len() != self.param_count * F32_BYTES {
            return corrupt(format!(
                "weight buffer holds {} bytes, descriptor expects {}",
                weights.len(),
                self.param_count * F32_BYTES
            ));
        }

        let computed = compute_checksum(weights);
        if computed != self.weights_checksum {
            return corrupt(format!(
                "weights checksum mismatch: expected {}, got {computed}",
                self.weights_checksum
            ));
        }

        Ok(())
    }
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Checksum over the JSON encoding of the layer list
pub fn architecture_checksum(layers: &[LayerSpec]) -> Result<String> {
    let canonical = serde_json::to_vec(layers).map_err(|source| ModelError::Serialization {
        what: "layer specs",
        source,
    })?;
    Ok(compute_checksum(&canonical))
}

/// Pack weights as little-endian `f32`
pub fn encode_weights(weights: &[f32]) -> Vec<u8> {
    weights.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Inverse of [`encode_weights`]
pub fn decode_weights(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % F32_BYTES != 0 {
        return Err(ModelError::ArtifactCorrupt(format!(
            "weight buffer length {} is not a multiple of {F32_BYTES}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(F32_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
