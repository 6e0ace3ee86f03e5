use ndarray::{Array4, ArrayD, Ix4, IxDyn};

use super::missing_cache;
use crate::{ModelError, Result};

/// Non-overlapping max pooling with a square window (stride == size).
/// Trailing rows/columns that do not fill a window are dropped.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    size: usize,
    // Flat `row * width + col` offset of each winner in its input plane
    cache: Option<(Array4<usize>, (usize, usize))>,
}

impl MaxPool2d {
    pub fn new(size: usize) -> Self {
        Self { size, cache: None }
    }

    fn pool(&self, x: &Array4<f32>) -> Result<(Array4<f32>, Array4<usize>)> {
        let (n, c, h, w) = x.dim();
        let p = self.size;
        let (oh, ow) = (h / p, w / p);
        if oh == 0 || ow == 0 {
            return Err(ModelError::InvalidArchitecture(format!(
                "max_pool window {p} larger than input {h}x{w}"
            )));
        }

        let mut out = Array4::zeros((n, c, oh, ow));
        let mut arg = Array4::zeros((n, c, oh, ow));

        for ((ni, ci, i, j), o) in out.indexed_iter_mut() {
            let mut best = f32::NEG_INFINITY;
            let mut best_at = (i * p) * w + j * p;
            for di in 0..p {
                for dj in 0..p {
                    let (r, col) = (i * p + di, j * p + dj);
                    let v = x[[ni, ci, r, col]];
                    if v > best {
                        best = v;
                        best_at = r * w + col;
                    }
                }
            }
            *o = best;
            arg[[ni, ci, i, j]] = best_at;
        }

        Ok((out, arg))
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix4>()?;
        let (_, _, h, w) = x.dim();
        let (out, arg) = self.pool(&x)?;
        self.cache = Some((arg, (h, w)));
        Ok(out.into_dyn())
    }

    pub fn infer(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x.into_dimensionality::<Ix4>()?;
        Ok(self.pool(&x)?.0.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some((arg, (h, w))) = &self.cache else {
            return Err(missing_cache("max_pool2d"));
        };
        let d = d.into_dimensionality::<Ix4>()?;
        let (n, c, _, _) = d.dim();

        let mut dx = Array4::zeros((n, c, *h, *w));
        for ((ni, ci, i, j), g) in d.indexed_iter() {
            let at = arg[[ni, ci, i, j]];
            dx[[ni, ci, at / w, at % w]] += *g;
        }

        Ok(dx.into_dyn())
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }
}

/// Collapses every non-batch axis into one.
#[derive(Debug, Clone, Default)]
pub struct Flatten {
    input_shape: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }

    fn flatten(x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let n = x.shape().first().copied().unwrap_or(0);
        let rest: usize = x.shape().iter().skip(1).product();
        let x = x.as_standard_layout().into_owned();
        Ok(x.into_shape_with_order(IxDyn(&[n, rest]))?)
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.input_shape = Some(x.shape().to_vec());
        Self::flatten(x)
    }

    pub fn infer(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        Self::flatten(x)
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some(shape) = &self.input_shape else {
            return Err(missing_cache("flatten"));
        };
        let d = d.as_standard_layout().into_owned();
        Ok(d.into_shape_with_order(IxDyn(shape))?)
    }

    pub fn clear_cache(&mut self) {
        self.input_shape = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_pool_picks_window_max() {
        let mut pool = MaxPool2d::new(2);
        let x = ArrayD::from_shape_vec(
            vec![1, 1, 2, 4],
            vec![1.0f32, 5.0, 2.0, 0.0, 3.0, 4.0, 9.0, -1.0],
        )
        .unwrap();

        let y = pool.forward(x).unwrap();
        assert_eq!(y.shape(), &[1, 1, 1, 2]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![5.0, 9.0]);

        let dx = pool
            .backward(ArrayD::from_elem(vec![1, 1, 1, 2], 1.0f32))
            .unwrap();
        assert_eq!(
            dx.iter().copied().collect::<Vec<_>>(),
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_pool_too_small_input() {
        let pool = MaxPool2d::new(2);
        assert!(pool.infer(ArrayD::zeros(vec![1, 1, 1, 1])).is_err());
    }

    #[test]
    fn test_flatten_round_trip_shape() {
        let mut flatten = Flatten::new();
        let y = flatten.forward(ArrayD::zeros(vec![2, 3, 4, 5])).unwrap();
        assert_eq!(y.shape(), &[2, 60]);
        let d = flatten.backward(y).unwrap();
        assert_eq!(d.shape(), &[2, 3, 4, 5]);
    }
}
