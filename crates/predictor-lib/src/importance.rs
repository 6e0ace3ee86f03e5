//! Feature importance by input flipping
//!
//! Each feature dimension is perturbed in every sample (`x -> 1 - x`); the
//! mean absolute change of the model output measures how sensitive the
//! model is to that dimension. Scores are scaled so the most sensitive
//! dimension gets 1.0.

use crate::Result;
use ndarray::{Array2, Axis};
use tracing::debug;

/// Score assigned to every dimension when no perturbation moves the output
pub const FLAT_IMPORTANCE: f32 = 1.0;

/// Compute one importance score per column of `features`.
///
/// # Arguments
/// * `features` - Normalized `(samples, dims)` inputs, every value in `[0, 1]`.
/// * `predict` - Deterministic prediction, one output per row.
///
/// # Returns
/// `dims` scores in `[0, 1]` with the maximum equal to 1.0.
pub fn feature_importance<F>(features: &Array2<f32>, predict: F) -> Result<Vec<f32>>
where
    F: Fn(&Array2<f32>) -> Result<Vec<f32>>,
{
    let baseline = predict(features)?;
    let dims = features.ncols();

    let mut diffs = Vec::with_capacity(dims);
    for dim in 0..dims {
        let mut flipped = features.clone();
        flipped
            .index_axis_mut(Axis(1), dim)
            .mapv_inplace(|x| 1.0 - x);

        let perturbed = predict(&flipped)?;
        let total: f32 = baseline
            .iter()
            .zip(&perturbed)
            .map(|(a, b)| (a - b).abs())
            .sum();
        diffs.push(total / baseline.len().max(1) as f32);
    }

    Ok(normalize_scores(diffs))
}

fn normalize_scores(diffs: Vec<f32>) -> Vec<f32> {
    let max = diffs
        .iter()
        .copied()
        .filter(|d| d.is_finite())
        .fold(0.0f32, f32::max);

    if max <= 0.0 {
        debug!("No dimension changed the output; importance is flat");
        return vec![FLAT_IMPORTANCE; diffs.len()];
    }

    diffs
        .into_iter()
        .map(|d| if d.is_finite() { (d / max).clamp(0.0, 1.0) } else { 1.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_model_ranks_by_weight() {
        let weights = [2.0f32, 0.5, 0.0];
        let predict = |x: &Array2<f32>| -> Result<Vec<f32>> {
            Ok(x.outer_iter()
                .map(|row| row.iter().zip(&weights).map(|(a, w)| a * w).sum())
                .collect())
        };
        let x = array![[0.1f32, 0.2, 0.3], [0.9, 0.4, 0.6]];

        let scores = feature_importance(&x, predict).unwrap();

        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0], 1.0);
        assert!(scores[1] > 0.0 && scores[1] < 1.0);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_constant_model_is_flat() {
        let x = array![[0.1f32, 0.2], [0.3, 0.4]];
        let scores = feature_importance(&x, |x| Ok(vec![3.0; x.nrows()])).unwrap();
        assert_eq!(scores, vec![1.0, 1.0]);
    }

    #[test]
    fn test_prediction_errors_propagate() {
        let x = array![[0.1f32]];
        let result = feature_importance(&x, |_| {
            Err(crate::ModelError::InvalidArchitecture("boom".into()))
        });
        assert!(result.is_err());
    }
}
