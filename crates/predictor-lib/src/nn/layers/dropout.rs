use ndarray::{ArrayD, IxDyn};
use rand::Rng;

use super::missing_cache;
use crate::nn::Mode;
use crate::Result;

/// Inverted dropout: zeroes each activation with probability `rate` and
/// scales the survivors by `1 / (1 - rate)`.
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f32,
    mask: Option<ArrayD<f32>>,
}

impl Dropout {
    pub fn new(rate: f32) -> Self {
        Self { rate, mask: None }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    fn sample_mask<R: Rng + ?Sized>(&self, shape: &[usize], rng: &mut R) -> ArrayD<f32> {
        let keep = 1.0 - self.rate;
        ArrayD::from_shape_fn(IxDyn(shape), |_| {
            if rng.random::<f32>() < keep {
                1.0 / keep
            } else {
                0.0
            }
        })
    }

    pub fn forward<R: Rng + ?Sized>(&mut self, x: ArrayD<f32>, rng: &mut R) -> ArrayD<f32> {
        let mask = self.sample_mask(x.shape(), rng);
        let y = x * &mask;
        self.mask = Some(mask);
        y
    }

    /// Identity in deterministic mode; a fresh random mask in Monte Carlo mode.
    pub fn infer<R: Rng + ?Sized>(&self, x: ArrayD<f32>, mode: Mode, rng: &mut R) -> ArrayD<f32> {
        match mode {
            Mode::Deterministic => x,
            Mode::MonteCarlo => {
                let mask = self.sample_mask(x.shape(), rng);
                x * &mask
            }
        }
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some(mask) = &self.mask else {
            return Err(missing_cache("dropout"));
        };
        Ok(d * mask)
    }

    pub fn clear_cache(&mut self) {
        self.mask = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_deterministic_inference_is_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = Dropout::new(0.5);
        let x = ArrayD::from_elem(vec![4, 4], 2.0f32);
        assert_eq!(layer.infer(x.clone(), Mode::Deterministic, &mut rng), x);
    }

    #[test]
    fn test_monte_carlo_drops_and_rescales() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = Dropout::new(0.5);
        let x = ArrayD::from_elem(vec![64, 16], 1.0f32);
        let y = layer.infer(x, Mode::MonteCarlo, &mut rng);

        assert!(y.iter().all(|v| *v == 0.0 || *v == 2.0));
        let kept = y.iter().filter(|v| **v > 0.0).count();
        assert!(kept > 300 && kept < 724, "kept {kept} of 1024");
    }

    #[test]
    fn test_backward_reuses_forward_mask() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut layer = Dropout::new(0.2);
        let y = layer.forward(ArrayD::from_elem(vec![8, 8], 1.0f32), &mut rng);
        let d = layer.backward(ArrayD::from_elem(vec![8, 8], 1.0f32)).unwrap();
        assert_eq!(y, d);
    }
}
