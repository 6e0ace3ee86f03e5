use ndarray::{Array2, ArrayView2, Axis};

/// A loss over `(batch, outputs)` predictions.
pub trait LossFn {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// Gradient of the loss with respect to the network output.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default()
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        (&y_pred - &y) * (2.0 / y_pred.len().max(1) as f32)
    }
}

const PROB_FLOOR: f32 = 1e-7;

/// Categorical cross-entropy over one-hot targets.
///
/// Expects softmax outputs. The gradient is the combined
/// softmax + cross-entropy gradient `(p - y) / batch`, so the softmax
/// activation passes deltas through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct CategoricalCrossEntropy;

impl LossFn for CategoricalCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let n = y_pred.len_of(Axis(0)).max(1) as f32;
        let total: f32 = y_pred
            .iter()
            .zip(y.iter())
            .map(|(p, t)| -t * p.clamp(PROB_FLOOR, 1.0 - PROB_FLOOR).ln())
            .sum();
        total / n
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.len_of(Axis(0)).max(1) as f32;
        (&y_pred - &y) / n
    }
}

/// MSE whose reported loss turns NaN from `from_epoch` on.
///
/// `loss` is called once per training batch plus once for validation, so
/// the epoch is derived from the call count. Gradients stay finite.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct DivergingMse {
    pub from_epoch: usize,
    pub calls_per_epoch: usize,
    pub calls: std::cell::Cell<usize>,
}

#[cfg(test)]
impl DivergingMse {
    pub fn new(from_epoch: usize, calls_per_epoch: usize) -> Self {
        Self {
            from_epoch,
            calls_per_epoch,
            calls: std::cell::Cell::new(0),
        }
    }
}

#[cfg(test)]
impl LossFn for DivergingMse {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if call / self.calls_per_epoch + 1 >= self.from_epoch {
            f32::NAN
        } else {
            Mse.loss(y_pred, y)
        }
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        Mse.loss_prime(y_pred, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mse() {
        let pred = array![[1.0f32], [3.0]];
        let y = array![[0.0f32], [1.0]];
        assert!((Mse.loss(pred.view(), y.view()) - 2.5).abs() < 1e-6);
        assert_eq!(Mse.loss_prime(pred.view(), y.view()), array![[1.0f32], [2.0]]);
    }

    #[test]
    fn test_cross_entropy_perfect_and_uniform() {
        let y = array![[0.0f32, 1.0]];
        let perfect = array![[0.0f32, 1.0]];
        assert!(CategoricalCrossEntropy.loss(perfect.view(), y.view()) < 1e-5);

        let uniform = array![[0.5f32, 0.5]];
        let l = CategoricalCrossEntropy.loss(uniform.view(), y.view());
        assert!((l - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_cross_entropy_gradient() {
        let y = array![[0.0f32, 1.0], [1.0, 0.0]];
        let p = array![[0.25f32, 0.75], [0.5, 0.5]];
        let g = CategoricalCrossEntropy.loss_prime(p.view(), y.view());
        assert_eq!(g, array![[0.125f32, -0.125], [-0.25, 0.25]]);
    }
}
