use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// Activation applied at the end of a dense or convolution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Linear,
    Relu,
    /// Row-wise softmax over the last axis. Only valid as the output of a
    /// network trained with `CategoricalCrossEntropy`, whose gradient is
    /// already taken with respect to the logits.
    Softmax,
}

impl Activation {
    /// Applies the activation to the pre-activation `z`.
    pub fn apply(&self, z: &ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Activation::Linear => z.clone(),
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Softmax => softmax(z),
        }
    }

    /// Multiplies the incoming delta `d` by the derivative at `z`.
    pub fn backprop(&self, z: &ArrayD<f32>, mut d: ArrayD<f32>) -> ArrayD<f32> {
        if let Activation::Relu = self {
            d.zip_mut_with(z, |d, &z| {
                if z <= 0.0 {
                    *d = 0.0;
                }
            });
        }
        d
    }
}

fn softmax(z: &ArrayD<f32>) -> ArrayD<f32> {
    let mut out = z.clone();
    let last = Axis(out.ndim().saturating_sub(1));

    for mut lane in out.lanes_mut(last) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        if sum > 0.0 {
            lane.mapv_inplace(|v| v / sum);
        }
    }

    out
}
