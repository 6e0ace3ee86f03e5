use ndarray::ArrayD;
use rand::Rng;

use super::{Layer, LayerSpec, Mode, ParamSlot};
use crate::{ModelError, Result};

/// A sequential network: information flows forward through the layers when
/// computing an output and backward when computing the gradients.
#[derive(Debug, Clone)]
pub struct Sequential {
    specs: Vec<LayerSpec>,
    layers: Vec<Layer>,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl Sequential {
    /// Builds a freshly initialized network.
    ///
    /// # Arguments
    /// * `specs` - The layers, in order.
    /// * `input_shape` - The per-sample input shape (without the batch axis).
    /// * `rng` - Source for weight initialization.
    ///
    /// # Returns
    /// The network, or `InvalidArchitecture` if consecutive layers do not fit.
    pub fn build<R: Rng + ?Sized>(
        specs: Vec<LayerSpec>,
        input_shape: &[usize],
        rng: &mut R,
    ) -> Result<Self> {
        if specs.is_empty() {
            return Err(ModelError::InvalidArchitecture(
                "network has no layers".to_string(),
            ));
        }

        let mut shape = input_shape.to_vec();
        for spec in &specs {
            shape = spec.output_shape(&shape)?;
        }

        let layers = specs.iter().map(|s| Layer::from_spec(s, rng)).collect();

        Ok(Self {
            specs,
            layers,
            input_shape: input_shape.to_vec(),
            output_shape: shape,
        })
    }

    pub fn specs(&self) -> &[LayerSpec] {
        &self.specs
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    /// Number of persisted scalars, including batch norm moving statistics.
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    fn check_input(&self, x: &ArrayD<f32>) -> Result<()> {
        if x.ndim() == 0 || x.shape()[1..] != self.input_shape[..] {
            return Err(ModelError::InvalidArchitecture(format!(
                "network expects samples of shape {:?}, got batch {:?}",
                self.input_shape,
                x.shape()
            )));
        }
        Ok(())
    }

    /// Training pass: dropout active, batch statistics, caches kept for
    /// [`Sequential::backward`].
    pub fn forward_train<R: Rng + ?Sized>(
        &mut self,
        mut x: ArrayD<f32>,
        rng: &mut R,
    ) -> Result<ArrayD<f32>> {
        self.check_input(&x)?;
        for layer in &mut self.layers {
            x = layer.forward(x, rng)?;
        }
        Ok(x)
    }

    /// Propagates the output delta back through every layer, leaving the
    /// gradients in each layer for the optimizer.
    pub fn backward(&mut self, mut d: ArrayD<f32>) -> Result<()> {
        for layer in self.layers.iter_mut().rev() {
            d = layer.backward(d)?;
        }
        Ok(())
    }

    /// Inference pass. Never mutates the network.
    pub fn infer<R: Rng + ?Sized>(
        &self,
        mut x: ArrayD<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<ArrayD<f32>> {
        self.check_input(&x)?;
        for layer in &self.layers {
            x = layer.infer(x, mode, rng)?;
        }
        Ok(x)
    }

    pub fn trainable_mut(&mut self) -> Vec<ParamSlot<'_>> {
        self.layers.iter_mut().flat_map(Layer::trainable).collect()
    }

    /// Sum of the L2 penalties of every regularized layer.
    pub fn regularization_loss(&self) -> f32 {
        self.layers.iter().map(Layer::regularization).sum()
    }

    /// Every persisted tensor, concatenated in layer order.
    pub fn flatten_weights(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.param_count());
        for layer in &self.layers {
            for w in layer.weights() {
                out.extend(w.iter().copied());
            }
        }
        out
    }

    /// Inverse of [`Sequential::flatten_weights`].
    pub fn assign_weights(&mut self, flat: &[f32]) -> Result<()> {
        let expected = self.param_count();
        if flat.len() != expected {
            return Err(ModelError::ArtifactCorrupt(format!(
                "expected {expected} weights, got {}",
                flat.len()
            )));
        }

        let mut offset = 0;
        for layer in &mut self.layers {
            for mut w in layer.weights_mut() {
                let n = w.len();
                for (dst, src) in w.iter_mut().zip(&flat[offset..offset + n]) {
                    *dst = *src;
                }
                offset += n;
            }
        }
        Ok(())
    }

    pub fn clear_cache(&mut self) {
        self.layers.iter_mut().for_each(Layer::clear_cache);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Activation;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_specs() -> Vec<LayerSpec> {
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
            LayerSpec::Dropout { rate: 0.2 },
            LayerSpec::Dense {
                inputs: 4,
                units: 1,
                activation: Activation::Linear,
                l2: 0.0,
            },
        ]
    }

    #[test]
    fn test_build_rejects_incompatible_layers() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut specs = small_specs();
        specs.push(LayerSpec::BatchNorm {
            features: 9,
            momentum: 0.9,
            epsilon: 1e-3,
        });
        assert!(Sequential::build(specs, &[3], &mut rng).is_err());
    }

    #[test]
    fn test_param_count_includes_moving_stats() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = Sequential::build(small_specs(), &[3], &mut rng).unwrap();
        // dense 3*4+4, batch norm 4*4, dense 4+1
        assert_eq!(net.param_count(), 16 + 16 + 5);
        assert_eq!(net.flatten_weights().len(), net.param_count());
    }

    #[test]
    fn test_assign_weights_round_trip() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = Sequential::build(small_specs(), &[3], &mut rng).unwrap();
        let mut b = Sequential::build(small_specs(), &[3], &mut rng).unwrap();
        assert_ne!(a.flatten_weights(), b.flatten_weights());

        b.assign_weights(&a.flatten_weights()).unwrap();
        assert_eq!(a.flatten_weights(), b.flatten_weights());

        let x = ArrayD::from_elem(vec![2, 3], 0.3f32);
        let ya = a.infer(x.clone(), Mode::Deterministic, &mut rng).unwrap();
        let yb = b.infer(x, Mode::Deterministic, &mut rng).unwrap();
        assert_eq!(ya, yb);
    }

    #[test]
    fn test_assign_weights_wrong_length() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut net = Sequential::build(small_specs(), &[3], &mut rng).unwrap();
        assert!(matches!(
            net.assign_weights(&[0.0; 3]),
            Err(ModelError::ArtifactCorrupt(_))
        ));
    }

    #[test]
    fn test_infer_rejects_wrong_sample_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = Sequential::build(small_specs(), &[3], &mut rng).unwrap();
        let x = ArrayD::zeros(vec![2, 5]);
        assert!(net.infer(x, Mode::Deterministic, &mut rng).is_err());
    }
}
