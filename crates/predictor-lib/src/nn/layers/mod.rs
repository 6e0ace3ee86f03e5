mod batch_norm;
mod conv;
mod dense;
mod dropout;
mod layer;
mod pool;

pub use batch_norm::BatchNorm;
pub use conv::Conv2d;
pub use dense::Dense;
pub use dropout::Dropout;
pub use layer::{Layer, LayerSpec};
pub use pool::{Flatten, MaxPool2d};

use ndarray::{ArrayViewD, ArrayViewMutD};

use crate::ModelError;

/// A trainable parameter tensor paired with its gradient.
pub struct ParamSlot<'a> {
    pub value: ArrayViewMutD<'a, f32>,
    pub grad: ArrayViewD<'a, f32>,
    /// L2 factor applied to this tensor (0 for biases and scale/shift).
    pub decay: f32,
}

fn shape_mismatch(layer: &str, expected: usize, got: usize) -> ModelError {
    ModelError::InvalidArchitecture(format!(
        "{layer} expected input dimension {expected}, got {got}"
    ))
}

fn missing_cache(layer: &str) -> ModelError {
    ModelError::InvalidArchitecture(format!("{layer} backward called without a forward pass"))
}
