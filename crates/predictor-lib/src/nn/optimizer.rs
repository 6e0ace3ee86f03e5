use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use super::ParamSlot;

/// Adam hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Global-norm gradient clipping threshold
    pub clip_norm: Option<f32>,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            clip_norm: Some(1.0),
        }
    }
}

/// Adam optimizer over a fixed, ordered list of parameter tensors.
///
/// Moment buffers are created on the first step from the shapes of the
/// slots handed in; later steps must pass the slots in the same order.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    beta1_t: f32,
    beta2_t: f32,
    moments: Vec<(ArrayD<f32>, ArrayD<f32>)>,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Self {
        Self {
            config,
            beta1_t: 1.0,
            beta2_t: 1.0,
            moments: Vec::new(),
        }
    }

    /// Applies one update to every slot.
    ///
    /// The L2 term `2 * decay * w` is added to each gradient before
    /// clipping; the clip scales all gradients by one shared factor.
    ///
    /// # Returns
    /// The global gradient norm before clipping.
    pub fn step(&mut self, slots: &mut [ParamSlot<'_>]) -> f32 {
        if self.moments.len() != slots.len() {
            self.moments = slots
                .iter()
                .map(|s| (ArrayD::zeros(s.grad.raw_dim()), ArrayD::zeros(s.grad.raw_dim())))
                .collect();
        }

        let grads: Vec<ArrayD<f32>> = slots
            .iter()
            .map(|s| {
                let mut g = s.grad.to_owned();
                if s.decay > 0.0 {
                    g.zip_mut_with(&s.value, |g, w| *g += 2.0 * s.decay * w);
                }
                g
            })
            .collect();

        let norm = grads
            .iter()
            .flat_map(|g| g.iter())
            .map(|g| g * g)
            .sum::<f32>()
            .sqrt();
        let scale = match self.config.clip_norm {
            Some(max) if norm > max && norm.is_finite() => max / norm,
            _ => 1.0,
        };

        let AdamConfig {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = self.config;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1.0 - self.beta1_t;
        let bc2 = 1.0 - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        for ((slot, g), (m, v)) in slots.iter_mut().zip(&grads).zip(self.moments.iter_mut()) {
            ndarray::Zip::from(&mut slot.value)
                .and(g)
                .and(m)
                .and(v)
                .for_each(|w, &g, m, v| {
                    let g = g * scale;
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *w -= step_size * *m / (v.sqrt() + eps);
                });
        }

        norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn slot<'a>(w: &'a mut Array1<f32>, g: &'a Array1<f32>, decay: f32) -> ParamSlot<'a> {
        ParamSlot {
            value: w.view_mut().into_dyn(),
            grad: g.view().into_dyn(),
            decay,
        }
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(AdamConfig {
            clip_norm: None,
            ..AdamConfig::default()
        });
        let mut w = array![1.0f32, -1.0];
        let g = array![0.5f32, -0.25];

        adam.step(&mut [slot(&mut w, &g, 0.0)]);

        // bias-corrected first step is lr * sign(g)
        assert!((w[0] - 0.999).abs() < 1e-5);
        assert!((w[1] + 0.999).abs() < 1e-5);
    }

    #[test]
    fn test_reports_unclipped_norm() {
        let mut adam = Adam::new(AdamConfig::default());
        let mut w = array![0.0f32, 0.0];
        let g = array![3.0f32, 4.0];
        let norm = adam.step(&mut [slot(&mut w, &g, 0.0)]);
        assert!((norm - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_decay_pulls_weights_towards_zero() {
        let mut adam = Adam::new(AdamConfig::default());
        let mut w = array![2.0f32];
        let g = array![0.0f32];
        adam.step(&mut [slot(&mut w, &g, 0.01)]);
        assert!(w[0] < 2.0);
    }
}
