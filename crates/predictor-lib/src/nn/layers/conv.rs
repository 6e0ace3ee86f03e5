use ndarray::{
    s, Array1, Array2, Array3, Array4, ArrayD, ArrayView2, ArrayView3, ArrayViewD, ArrayViewMutD,
    Axis, Ix4,
};
use rand::Rng;

use super::{missing_cache, shape_mismatch, ParamSlot};
use crate::nn::Activation;
use crate::Result;

/// 2-D convolution with square kernels, stride 1 and valid padding over
/// channel-first `(batch, channels, height, width)` inputs.
///
/// Implemented as im2col followed by a matrix product per sample.
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    filters: usize,
    kernel: usize,
    activation: Activation,

    // (filters, in_channels * kernel * kernel)
    w: Array2<f32>,
    b: Array1<f32>,

    dw: Array2<f32>,
    db: Array1<f32>,

    cache: Option<ConvCache>,
}

#[derive(Debug, Clone)]
struct ConvCache {
    cols: Vec<Array2<f32>>,
    input_dim: (usize, usize, usize),
    z: ArrayD<f32>,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        filters: usize,
        kernel: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let fan_in = in_channels * kernel * kernel;
        let fan_out = filters * kernel * kernel;
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let w = Array2::from_shape_fn((filters, fan_in), |_| rng.random_range(-limit..limit));

        Self {
            in_channels,
            filters,
            kernel,
            activation,
            w,
            b: Array1::zeros(filters),
            dw: Array2::zeros((filters, fan_in)),
            db: Array1::zeros(filters),
            cache: None,
        }
    }

    pub fn size(&self) -> usize {
        self.w.len() + self.b.len()
    }

    fn output_hw(&self, h: usize, w: usize) -> (usize, usize) {
        (h + 1 - self.kernel, w + 1 - self.kernel)
    }

    fn check(&self, x: &Array4<f32>) -> Result<()> {
        let (_, c, h, w) = x.dim();
        if c != self.in_channels {
            return Err(shape_mismatch("conv2d", self.in_channels, c));
        }
        if h < self.kernel || w < self.kernel {
            return Err(shape_mismatch("conv2d", self.kernel, h.min(w)));
        }
        Ok(())
    }

    /// Pre-activation output and the im2col matrices of each sample.
    fn convolve(&self, x: &Array4<f32>) -> Result<(Array4<f32>, Vec<Array2<f32>>)> {
        self.check(x)?;
        let (n, _, h, w) = x.dim();
        let (oh, ow) = self.output_hw(h, w);

        let mut z = Array4::zeros((n, self.filters, oh, ow));
        let mut cols = Vec::with_capacity(n);
        let bias = self.b.view().insert_axis(Axis(1));

        for (i, sample) in x.outer_iter().enumerate() {
            let c = im2col(sample, self.kernel);
            let zi = self.w.dot(&c) + &bias;
            z.index_axis_mut(Axis(0), i)
                .assign(&zi.into_shape_with_order((self.filters, oh, ow))?);
            cols.push(c);
        }

        Ok((z, cols))
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix4>()?;
        let (_, c, h, w) = x.dim();
        let (z, cols) = self.convolve(&x)?;
        let z = z.into_dyn();
        let a = self.activation.apply(&z);

        self.cache = Some(ConvCache {
            cols,
            input_dim: (c, h, w),
            z,
        });
        Ok(a)
    }

    pub fn infer(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix4>()?;
        let (z, _) = self.convolve(&x)?;
        Ok(self.activation.apply(&z.into_dyn()))
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some(cache) = &self.cache else {
            return Err(missing_cache("conv2d"));
        };

        let dz = self
            .activation
            .backprop(&cache.z, d)
            .into_dimensionality::<Ix4>()?;
        let (n, f, oh, ow) = dz.dim();
        let (c, h, w) = cache.input_dim;

        let mut dw = Array2::zeros(self.w.raw_dim());
        let mut db = Array1::zeros(self.filters);
        let mut dx = Array4::zeros((n, c, h, w));

        for (i, dzi) in dz.outer_iter().enumerate() {
            let dzi = dzi.to_owned().into_shape_with_order((f, oh * ow))?;
            dw += &dzi.dot(&cache.cols[i].t());
            db += &dzi.sum_axis(Axis(1));

            let dcols = self.w.t().dot(&dzi);
            dx.index_axis_mut(Axis(0), i)
                .assign(&col2im(dcols.view(), (c, h, w), self.kernel));
        }

        self.dw = dw;
        self.db = db;
        Ok(dx.into_dyn())
    }

    pub fn trainable(&mut self) -> Vec<ParamSlot<'_>> {
        let Self { w, b, dw, db, .. } = self;

        vec![
            ParamSlot {
                value: w.view_mut().into_dyn(),
                grad: dw.view().into_dyn(),
                decay: 0.0,
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

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }
}

/// Unfolds every `k x k` patch of a `(channels, h, w)` image into a column.
///
/// Row `(ch * k + ki) * k + kj` holds the pixel at offset `(ki, kj)` of
/// channel `ch` for every output position.
fn im2col(x: ArrayView3<f32>, k: usize) -> Array2<f32> {
    let (c, h, w) = x.dim();
    let (oh, ow) = (h + 1 - k, w + 1 - k);
    let mut cols = Array2::zeros((c * k * k, oh * ow));

    for ch in 0..c {
        for ki in 0..k {
            for kj in 0..k {
                let row = (ch * k + ki) * k + kj;
                let patch = x.slice(s![ch, ki..ki + oh, kj..kj + ow]);
                for (dst, src) in cols.row_mut(row).iter_mut().zip(patch.iter()) {
                    *dst = *src;
                }
            }
        }
    }

    cols
}

/// Inverse of [`im2col`]: scatters columns back, summing overlaps.
fn col2im(cols: ArrayView2<f32>, (c, h, w): (usize, usize, usize), k: usize) -> Array3<f32> {
    let (oh, ow) = (h + 1 - k, w + 1 - k);
    let mut x = Array3::zeros((c, h, w));

    for ch in 0..c {
        for ki in 0..k {
            for kj in 0..k {
                let row = (ch * k + ki) * k + kj;
                let mut patch = x.slice_mut(s![ch, ki..ki + oh, kj..kj + ow]);
                for (dst, src) in patch.iter_mut().zip(cols.row(row).iter()) {
                    *dst += *src;
                }
            }
        }
    }

    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_im2col_layout() {
        let x = Array3::from_shape_fn((1, 3, 3), |(_, i, j)| (i * 3 + j) as f32);
        let cols = im2col(x.view(), 2);
        assert_eq!(cols.dim(), (4, 4));
        // top-left offset of each of the 4 output positions
        assert_eq!(cols.row(0).to_vec(), vec![0.0, 1.0, 3.0, 4.0]);
        // bottom-right offset
        assert_eq!(cols.row(3).to_vec(), vec![4.0, 5.0, 7.0, 8.0]);
    }

    #[test]
    fn test_col2im_counts_overlaps() {
        let cols = Array2::ones((4, 4));
        let x = col2im(cols.view(), (1, 3, 3), 2);
        assert_eq!(x[[0, 0, 0]], 1.0);
        assert_eq!(x[[0, 1, 1]], 4.0);
        assert_eq!(x[[0, 0, 1]], 2.0);
    }

    #[test]
    fn test_forward_backward_shapes() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut conv = Conv2d::new(3, 4, 3, Activation::Relu, &mut rng);
        let x = ArrayD::from_elem(vec![2, 3, 8, 8], 0.5f32);

        let y = conv.forward(x).unwrap();
        assert_eq!(y.shape(), &[2, 4, 6, 6]);

        let dx = conv.backward(ArrayD::ones(vec![2, 4, 6, 6])).unwrap();
        assert_eq!(dx.shape(), &[2, 3, 8, 8]);
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let mut rng = StdRng::seed_from_u64(5);
        let conv = Conv2d::new(3, 2, 3, Activation::Relu, &mut rng);
        assert!(conv.infer(ArrayD::zeros(vec![1, 1, 8, 8])).is_err());
    }
}
