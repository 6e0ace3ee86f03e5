use ndarray::{Array1, Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis, Ix2};
use rand::Rng;

use super::{missing_cache, shape_mismatch, ParamSlot};
use crate::nn::Activation;
use crate::Result;

/// Fully connected layer: `a = act(x · w + b)`.
#[derive(Debug, Clone)]
pub struct Dense {
    w: Array2<f32>,
    b: Array1<f32>,
    activation: Activation,
    l2: f32,

    // Gradients of the last backward pass
    dw: Array2<f32>,
    db: Array1<f32>,

    // Forward metadata
    x: Option<Array2<f32>>,
    z: Option<ArrayD<f32>>,
}

impl Dense {
    /// Creates a new `Dense` with Glorot-uniform weights and zero biases.
    ///
    /// # Arguments
    /// * `inputs` - Width of the incoming activations.
    /// * `units` - Number of output units.
    /// * `activation` - Activation applied to the output.
    /// * `l2` - L2 penalty factor on the kernel (0 disables it).
    pub fn new<R: Rng + ?Sized>(
        inputs: usize,
        units: usize,
        activation: Activation,
        l2: f32,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (inputs + units) as f32).sqrt();
        let w = Array2::from_shape_fn((inputs, units), |_| rng.random_range(-limit..limit));

        Self {
            w,
            b: Array1::zeros(units),
            activation,
            l2,
            dw: Array2::zeros((inputs, units)),
            db: Array1::zeros(units),
            x: None,
            z: None,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.w.len() + self.b.len()
    }

    fn linear(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.w.nrows() {
            return Err(shape_mismatch("dense", self.w.nrows(), x.ncols()));
        }
        Ok(x.dot(&self.w) + &self.b)
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix2>()?;
        let z = self.linear(x.view())?.into_dyn();
        let a = self.activation.apply(&z);

        self.x = Some(x);
        self.z = Some(z);
        Ok(a)
    }

    pub fn infer(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix2>()?;
        let z = self.linear(x.view())?.into_dyn();
        Ok(self.activation.apply(&z))
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let (Some(x), Some(z)) = (&self.x, &self.z) else {
            return Err(missing_cache("dense"));
        };

        let dz = self.activation.backprop(z, d).into_dimensionality::<Ix2>()?;
        self.dw = x.t().dot(&dz);
        self.db = dz.sum_axis(Axis(0));

        Ok(dz.dot(&self.w.t()).into_dyn())
    }

    pub fn trainable(&mut self) -> Vec<ParamSlot<'_>> {
        let Self {
            w, b, dw, db, l2, ..
        } = self;

        vec![
            ParamSlot {
                value: w.view_mut().into_dyn(),
                grad: dw.view().into_dyn(),
                decay: *l2,
            },
            ParamSlot {
                value: b.view_mut().into_dyn(),
                grad: db.view().into_dyn(),
                decay: 0.0,
            },
        ]
    }

    pub fn weights(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.w.view().into_dyn(), self.b.view().into_dyn()]
    }

    pub fn weights_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.w.view_mut().into_dyn(), self.b.view_mut().into_dyn()]
    }

    /// L2 penalty contributed to the loss.
    pub fn regularization(&self) -> f32 {
        if self.l2 == 0.0 {
            return 0.0;
        }
        self.l2 * self.w.iter().map(|w| w * w).sum::<f32>()
    }

    pub fn clear_cache(&mut self) {
        self.x = None;
        self.z = None;
    }
}
