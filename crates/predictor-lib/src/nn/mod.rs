//! Minimal neural network toolkit used by the price and image models
//!
//! This module provides:
//! - Layers (dense, batch norm, dropout, conv, pooling) with explicit backprop
//! - A `Sequential` network built from serializable layer specs
//! - Loss functions, the Adam optimizer and the epoch loop

mod activation;
pub mod fit;
pub mod layers;
mod loss;
mod optimizer;
mod sequential;

pub use activation::Activation;
pub use fit::{fit, FitConfig, FitOutcome};
pub use layers::{Layer, LayerSpec, ParamSlot};
pub use loss::{CategoricalCrossEntropy, LossFn, Mse};
#[cfg(test)]
pub(crate) use loss::DivergingMse;
pub use optimizer::{Adam, AdamConfig};
pub use sequential::Sequential;

use ndarray::ArrayD;

/// Dynamic-rank tensor; the first axis is always the batch.
pub type Tensor = ArrayD<f32>;

/// How dropout behaves in an inference pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Dropout disabled
    Deterministic,
    /// Dropout sampled on every pass (Monte Carlo dropout)
    MonteCarlo,
}
