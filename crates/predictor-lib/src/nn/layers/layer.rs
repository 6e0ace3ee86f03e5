use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{BatchNorm, Conv2d, Dense, Dropout, Flatten, MaxPool2d, ParamSlot};
use crate::nn::{Activation, Mode};
use crate::{ModelError, Result};

/// Serializable description of one layer. A list of these is the
/// architecture part of a persisted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        inputs: usize,
        units: usize,
        activation: Activation,
        l2: f32,
    },
    BatchNorm {
        features: usize,
        momentum: f32,
        epsilon: f32,
    },
    Dropout {
        rate: f32,
    },
    Conv2d {
        in_channels: usize,
        filters: usize,
        kernel: usize,
        activation: Activation,
    },
    MaxPool2d {
        size: usize,
    },
    Flatten,
}

impl LayerSpec {
    /// Per-sample output shape for a per-sample `input` shape.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let invalid = |msg: String| ModelError::InvalidArchitecture(msg);

        match *self {
            LayerSpec::Dense { inputs, units, .. } => match input {
                [n] if *n == inputs => Ok(vec![units]),
                _ => Err(invalid(format!("dense({inputs}) cannot take input {input:?}"))),
            },
            LayerSpec::BatchNorm { features, .. } => match input {
                [n] if *n == features => Ok(vec![features]),
                _ => Err(invalid(format!(
                    "batch_norm({features}) cannot take input {input:?}"
                ))),
            },
            LayerSpec::Dropout { rate } => {
                if !(0.0..1.0).contains(&rate) {
                    return Err(invalid(format!("dropout rate {rate} outside [0, 1)")));
                }
                Ok(input.to_vec())
            }
            LayerSpec::Conv2d {
                in_channels,
                filters,
                kernel,
                ..
            } => match input {
                [c, h, w] if *c == in_channels && *h >= kernel && *w >= kernel && kernel > 0 => {
                    Ok(vec![filters, h + 1 - kernel, w + 1 - kernel])
                }
                _ => Err(invalid(format!(
                    "conv2d({in_channels}->{filters}, k={kernel}) cannot take input {input:?}"
                ))),
            },
            LayerSpec::MaxPool2d { size } => match input {
                [c, h, w] if size > 0 && *h >= size && *w >= size => {
                    Ok(vec![*c, h / size, w / size])
                }
                _ => Err(invalid(format!("max_pool({size}) cannot take input {input:?}"))),
            },
            LayerSpec::Flatten => Ok(vec![input.iter().product()]),
        }
    }
}

/// A network layer. Training passes cache what `backward` needs;
/// inference passes take `&self` and cache nothing.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    BatchNorm(BatchNorm),
    Dropout(Dropout),
    Conv2d(Conv2d),
    MaxPool2d(MaxPool2d),
    Flatten(Flatten),
}

impl Layer {
    pub fn from_spec<R: Rng + ?Sized>(spec: &LayerSpec, rng: &mut R) -> Self {
        match *spec {
            LayerSpec::Dense {
                inputs,
                units,
                activation,
                l2,
            } => Layer::Dense(Dense::new(inputs, units, activation, l2, rng)),
            LayerSpec::BatchNorm {
                features,
                momentum,
                epsilon,
            } => Layer::BatchNorm(BatchNorm::new(features, momentum, epsilon)),
            LayerSpec::Dropout { rate } => Layer::Dropout(Dropout::new(rate)),
            LayerSpec::Conv2d {
                in_channels,
                filters,
                kernel,
                activation,
            } => Layer::Conv2d(Conv2d::new(in_channels, filters, kernel, activation, rng)),
            LayerSpec::MaxPool2d { size } => Layer::MaxPool2d(MaxPool2d::new(size)),
            LayerSpec::Flatten => Layer::Flatten(Flatten::new()),
        }
    }

    pub fn forward<R: Rng + ?Sized>(&mut self, x: ArrayD<f32>, rng: &mut R) -> Result<ArrayD<f32>> {
        match self {
            Layer::Dense(l) => l.forward(x),
            Layer::BatchNorm(l) => l.forward(x),
            Layer::Dropout(l) => Ok(l.forward(x, rng)),
            Layer::Conv2d(l) => l.forward(x),
            Layer::MaxPool2d(l) => l.forward(x),
            Layer::Flatten(l) => l.forward(x),
        }
    }

    pub fn infer<R: Rng + ?Sized>(
        &self,
        x: ArrayD<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<ArrayD<f32>> {
        match self {
            Layer::Dense(l) => l.infer(x),
            Layer::BatchNorm(l) => l.infer(x),
            Layer::Dropout(l) => Ok(l.infer(x, mode, rng)),
            Layer::Conv2d(l) => l.infer(x),
            Layer::MaxPool2d(l) => l.infer(x),
            Layer::Flatten(l) => l.infer(x),
        }
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self {
            Layer::Dense(l) => l.backward(d),
            Layer::BatchNorm(l) => l.backward(d),
            Layer::Dropout(l) => l.backward(d),
            Layer::Conv2d(l) => l.backward(d),
            Layer::MaxPool2d(l) => l.backward(d),
            Layer::Flatten(l) => l.backward(d),
        }
    }

    pub fn trainable(&mut self) -> Vec<ParamSlot<'_>> {
        match self {
            Layer::Dense(l) => l.trainable(),
            Layer::BatchNorm(l) => l.trainable(),
            Layer::Conv2d(l) => l.trainable(),
            Layer::Dropout(_) | Layer::MaxPool2d(_) | Layer::Flatten(_) => Vec::new(),
        }
    }

    /// Every persisted tensor of the layer, in a fixed order.
    pub fn weights(&self) -> Vec<ArrayViewD<'_, f32>> {
        match self {
            Layer::Dense(l) => l.weights(),
            Layer::BatchNorm(l) => l.weights(),
            Layer::Conv2d(l) => l.weights(),
            Layer::Dropout(_) | Layer::MaxPool2d(_) | Layer::Flatten(_) => Vec::new(),
        }
    }

    pub fn weights_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        match self {
            Layer::Dense(l) => l.weights_mut(),
            Layer::BatchNorm(l) => l.weights_mut(),
            Layer::Conv2d(l) => l.weights_mut(),
            Layer::Dropout(_) | Layer::MaxPool2d(_) | Layer::Flatten(_) => Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Layer::Dense(l) => l.size(),
            Layer::BatchNorm(l) => l.size(),
            Layer::Conv2d(l) => l.size(),
            Layer::Dropout(_) | Layer::MaxPool2d(_) | Layer::Flatten(_) => 0,
        }
    }

    pub fn regularization(&self) -> f32 {
        match self {
            Layer::Dense(l) => l.regularization(),
            _ => 0.0,
        }
    }

    pub fn clear_cache(&mut self) {
        match self {
            Layer::Dense(l) => l.clear_cache(),
            Layer::BatchNorm(l) => l.clear_cache(),
            Layer::Dropout(l) => l.clear_cache(),
            Layer::Conv2d(l) => l.clear_cache(),
            Layer::MaxPool2d(l) => l.clear_cache(),
            Layer::Flatten(l) => l.clear_cache(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_shapes_through_conv_stack() {
        let specs = [
            LayerSpec::Conv2d {
                in_channels: 3,
                filters: 8,
                kernel: 3,
                activation: Activation::Relu,
            },
            LayerSpec::MaxPool2d { size: 2 },
            LayerSpec::Flatten,
        ];
        let mut shape = vec![3, 10, 10];
        for spec in &specs {
            shape = spec.output_shape(&shape).unwrap();
        }
        assert_eq!(shape, vec![8 * 4 * 4]);
    }

    #[test]
    fn test_dense_rejects_mismatched_input() {
        let spec = LayerSpec::Dense {
            inputs: 7,
            units: 16,
            activation: Activation::Relu,
            l2: 0.0,
        };
        assert!(spec.output_shape(&[8]).is_err());
        assert_eq!(spec.output_shape(&[7]).unwrap(), vec![16]);
    }

    #[test]
    fn test_spec_json_is_tagged() {
        let spec = LayerSpec::Dropout { rate: 0.2 };
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"type":"dropout","rate":0.2}"#);
    }
}
