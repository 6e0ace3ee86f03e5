use ndarray::{Array1, Array2, ArrayD, ArrayViewD, ArrayViewMutD, Axis, Ix2};

use super::{missing_cache, shape_mismatch, ParamSlot};
use crate::{ModelError, Result};

/// Batch normalization over the feature axis of a `(batch, features)` input.
///
/// Training normalizes with the batch statistics and folds them into the
/// moving averages; inference always uses the moving averages.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    moving_mean: Array1<f32>,
    moving_var: Array1<f32>,
    momentum: f32,
    epsilon: f32,

    dgamma: Array1<f32>,
    dbeta: Array1<f32>,

    // Forward metadata: normalized input and 1/sqrt(var + eps)
    cache: Option<(Array2<f32>, Array1<f32>)>,
}

impl BatchNorm {
    pub fn new(features: usize, momentum: f32, epsilon: f32) -> Self {
        Self {
            gamma: Array1::ones(features),
            beta: Array1::zeros(features),
            moving_mean: Array1::zeros(features),
            moving_var: Array1::ones(features),
            momentum,
            epsilon,
            dgamma: Array1::zeros(features),
            dbeta: Array1::zeros(features),
            cache: None,
        }
    }

    pub fn size(&self) -> usize {
        self.gamma.len() * 4
    }

    fn check(&self, x: &Array2<f32>) -> Result<()> {
        if x.ncols() != self.gamma.len() {
            return Err(shape_mismatch("batch_norm", self.gamma.len(), x.ncols()));
        }
        if x.nrows() == 0 {
            return Err(ModelError::InvalidArchitecture(
                "batch_norm received an empty batch".into(),
            ));
        }
        Ok(())
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix2>()?;
        self.check(&x)?;

        let n = x.nrows() as f32;
        let mean = x.sum_axis(Axis(0)) / n;
        let centered = &x - &mean;
        let var = centered.mapv(|v| v * v).sum_axis(Axis(0)) / n;
        let inv_std = var.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let x_hat = &centered * &inv_std;
        let y = &x_hat * &self.gamma + &self.beta;

        let m = self.momentum;
        self.moving_mean = &self.moving_mean * m + &mean * (1.0 - m);
        self.moving_var = &self.moving_var * m + &var * (1.0 - m);
        self.cache = Some((x_hat, inv_std));

        Ok(y.into_dyn())
    }

    pub fn infer(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix2>()?;
        self.check(&x)?;

        let inv_std = self.moving_var.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let y = (&x - &self.moving_mean) * &inv_std * &self.gamma + &self.beta;
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some((x_hat, inv_std)) = &self.cache else {
            return Err(missing_cache("batch_norm"));
        };
        let d = d.into_dimensionality::<Ix2>()?;
        let n = d.nrows() as f32;

        self.dbeta = d.sum_axis(Axis(0));
        self.dgamma = (&d * x_hat).sum_axis(Axis(0));

        let dx_hat = &d * &self.gamma;
        let sum_dx_hat = dx_hat.sum_axis(Axis(0));
        let sum_dx_hat_x_hat = (&dx_hat * x_hat).sum_axis(Axis(0));
        let dx = (dx_hat * n - &sum_dx_hat - x_hat * &sum_dx_hat_x_hat) * inv_std / n;

        Ok(dx.into_dyn())
    }

    pub fn trainable(&mut self) -> Vec<ParamSlot<'_>> {
        let Self {
            gamma,
            beta,
            dgamma,
            dbeta,
            ..
        } = self;

        vec![
            ParamSlot {
                value: gamma.view_mut().into_dyn(),
                grad: dgamma.view().into_dyn(),
                decay: 0.0,
            },
            ParamSlot {
                value: beta.view_mut().into_dyn(),
                grad: dbeta.view().into_dyn(),
                decay: 0.0,
            },
        ]
    }

    /// Trainable parameters followed by the moving statistics.
    pub fn weights(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![
            self.gamma.view().into_dyn(),
            self.beta.view().into_dyn(),
            self.moving_mean.view().into_dyn(),
            self.moving_var.view().into_dyn(),
        ]
    }

    pub fn weights_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.gamma.view_mut().into_dyn(),
            self.beta.view_mut().into_dyn(),
            self.moving_mean.view_mut().into_dyn(),
            self.moving_var.view_mut().into_dyn(),
        ]
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_training_output_is_standardized() {
        let mut bn = BatchNorm::new(2, 0.9, 1e-5);
        let x = arr2(&[[1.0f32, 10.0], [3.0, 20.0], [5.0, 30.0]]).into_dyn();
        let y = bn.forward(x).unwrap();

        for col in y.lanes(Axis(0)) {
            assert!(col.mean().unwrap().abs() < 1e-5);
        }
        // moving mean moved 10% of the way towards the batch mean
        assert!((bn.moving_mean[0] - 0.3).abs() < 1e-5);
        assert!((bn.moving_mean[1] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_inference_uses_moving_statistics() {
        let bn = BatchNorm::new(1, 0.9, 0.0);
        let y = bn.infer(arr2(&[[4.0f32]]).into_dyn()).unwrap();
        // mean 0, var 1, gamma 1, beta 0
        assert_eq!(y[[0, 0]], 4.0);
    }

    #[test]
    fn test_backward_sums_to_zero() {
        let mut bn = BatchNorm::new(1, 0.9, 1e-5);
        bn.forward(arr2(&[[1.0f32], [2.0], [4.0]]).into_dyn()).unwrap();
        let dx = bn
            .backward(arr2(&[[0.3f32], [-1.0], [0.5]]).into_dyn())
            .unwrap();
        // gradient through the batch mean removes any constant component
        assert!(dx.sum().abs() < 1e-5);
    }
}
