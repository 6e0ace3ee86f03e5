//! Epoch loop shared by the price and image trainers

use ndarray::{Array2, ArrayD, Axis, Ix2};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use super::{Adam, AdamConfig, LossFn, Mode, Sequential};
use crate::models::EpochMetrics;
use crate::{ModelError, Result};

/// Loop hyperparameters.
#[derive(Debug, Clone, Copy)]
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of samples held out for validation
    pub validation_split: f32,
    pub adam: AdamConfig,
    /// Track arg-max accuracy (classification only)
    pub accuracy: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 8,
            validation_split: 0.2,
            adam: AdamConfig::default(),
            accuracy: false,
        }
    }
}

/// What a completed (or early-stopped) fit produced.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    /// One entry per epoch with finite losses
    pub history: Vec<EpochMetrics>,
    /// 1-based epoch whose loss was not finite, if training stopped early
    pub diverged_at_epoch: Option<usize>,
}

impl FitOutcome {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.history.last()
    }
}

/// Shuffles `0..n` and splits it into `(train, validation)`.
///
/// The validation part gets `round(n * fraction)` indices, clamped so that
/// both parts hold at least one sample when `n >= 2`.
pub fn split_indices<R: Rng + ?Sized>(
    n: usize,
    fraction: f32,
    rng: &mut R,
) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(rng);

    if n < 2 {
        return (idx, Vec::new());
    }

    let n_val = ((n as f32 * fraction).round() as usize).clamp(1, n - 1);
    let val = idx.split_off(n - n_val);
    (idx, val)
}

fn accuracy(pred: &Array2<f32>, y: &Array2<f32>) -> f32 {
    let argmax = |row: ndarray::ArrayView1<f32>| {
        row.iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                if v > best.1 {
                    (i, v)
                } else {
                    best
                }
            })
            .0
    };

    let n = pred.nrows();
    if n == 0 {
        return 0.0;
    }
    let hits = pred
        .outer_iter()
        .zip(y.outer_iter())
        .filter(|(p, t)| argmax(p.view()) == argmax(t.view()))
        .count();
    hits as f32 / n as f32
}

/// Trains `net` in place.
///
/// After every epoch with finite losses the weights are snapshotted. A
/// non-finite training or validation loss stops the loop and restores the
/// last snapshot; if that happens on the first epoch there is nothing to
/// restore and `TrainingDiverged` is returned. Zero epochs is rejected
/// with `InvalidConfig`, so a successful outcome always has a history.
///
/// # Arguments
/// * `net` - The network to train.
/// * `loss_fn` - The loss to minimize.
/// * `x` - Inputs, batch axis first.
/// * `y` - Targets, `(samples, outputs)`.
/// * `config` - Loop hyperparameters.
/// * `rng` - Shuffling and dropout source.
/// * `on_epoch` - Called with each finite epoch's metrics.
pub fn fit<L, R, F>(
    net: &mut Sequential,
    loss_fn: &L,
    x: &ArrayD<f32>,
    y: &Array2<f32>,
    config: &FitConfig,
    rng: &mut R,
    mut on_epoch: F,
) -> Result<FitOutcome>
where
    L: LossFn,
    R: Rng + ?Sized,
    F: FnMut(&EpochMetrics),
{
    if config.epochs == 0 {
        return Err(ModelError::InvalidConfig("epochs must be at least 1".to_string()));
    }

    let n = y.nrows();
    let (mut train_idx, val_idx) = split_indices(n, config.validation_split, rng);
    let x_val = x.select(Axis(0), &val_idx);
    let y_val = y.select(Axis(0), &val_idx);
    let batch_size = config.batch_size.max(1);

    let mut adam = Adam::new(config.adam);
    let mut snapshot: Option<Vec<f32>> = None;
    let mut outcome = FitOutcome {
        history: Vec::with_capacity(config.epochs),
        diverged_at_epoch: None,
    };

    for epoch in 1..=config.epochs {
        train_idx.shuffle(rng);

        let mut loss_sum = 0.0;
        let mut hits = 0.0;
        for chunk in train_idx.chunks(batch_size) {
            let xb = x.select(Axis(0), chunk);
            let yb = y.select(Axis(0), chunk);

            let pred = net.forward_train(xb, rng)?.into_dimensionality::<Ix2>()?;
            let batch_loss = loss_fn.loss(pred.view(), yb.view()) + net.regularization_loss();
            loss_sum += batch_loss * chunk.len() as f32;
            if config.accuracy {
                hits += accuracy(&pred, &yb) * chunk.len() as f32;
            }

            let d = loss_fn.loss_prime(pred.view(), yb.view());
            net.backward(d.into_dyn())?;
            adam.step(&mut net.trainable_mut());
        }
        let loss = loss_sum / train_idx.len().max(1) as f32;

        let (validation_loss, validation_accuracy) = if val_idx.is_empty() {
            (None, None)
        } else {
            let pred = net
                .infer(x_val.clone(), Mode::Deterministic, rng)?
                .into_dimensionality::<Ix2>()?;
            let vl = loss_fn.loss(pred.view(), y_val.view()) + net.regularization_loss();
            let va = config.accuracy.then(|| accuracy(&pred, &y_val));
            (Some(vl), va)
        };

        if !loss.is_finite() || !validation_loss.unwrap_or(0.0).is_finite() {
            let Some(weights) = snapshot.take() else {
                net.clear_cache();
                return Err(ModelError::TrainingDiverged { epoch });
            };
            warn!(
                epoch = epoch,
                loss = loss,
                "Training diverged; restoring weights from the last finite epoch"
            );
            net.assign_weights(&weights)?;
            outcome.diverged_at_epoch = Some(epoch);
            break;
        }

        let metrics = EpochMetrics {
            epoch,
            loss,
            validation_loss,
            accuracy: config
                .accuracy
                .then(|| hits / train_idx.len().max(1) as f32),
            validation_accuracy,
        };
        debug!(
            epoch = epoch,
            loss = loss,
            validation_loss = ?validation_loss,
            "Epoch finished"
        );
        on_epoch(&metrics);
        outcome.history.push(metrics);
        snapshot = Some(net.flatten_weights());
    }

    net.clear_cache();
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, DivergingMse, LayerSpec, Mse};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn linear_net(rng: &mut StdRng) -> Sequential {
        Sequential::build(
            vec![LayerSpec::Dense {
                inputs: 1,
                units: 1,
                activation: Activation::Linear,
                l2: 0.0,
            }],
            &[1],
            rng,
        )
        .unwrap()
    }

    #[test]
    fn test_split_keeps_both_sides_non_empty() {
        let mut rng = StdRng::seed_from_u64(0);
        let (train, val) = split_indices(5, 0.2, &mut rng);
        assert_eq!((train.len(), val.len()), (4, 1));

        let (train, val) = split_indices(2, 0.2, &mut rng);
        assert_eq!((train.len(), val.len()), (1, 1));

        let (train, val) = split_indices(100, 0.2, &mut rng);
        assert_eq!((train.len(), val.len()), (80, 20));

        let mut all: Vec<usize> = train.into_iter().chain(val).collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_fit_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut net = linear_net(&mut rng);
        let x = ArrayD::from_shape_fn(vec![40, 1], |i| i[0] as f32 / 40.0);
        let y = Array2::from_shape_fn((40, 1), |(i, _)| 0.5 * i as f32 / 40.0 + 0.1);

        let config = FitConfig {
            epochs: 60,
            adam: AdamConfig {
                learning_rate: 0.05,
                ..AdamConfig::default()
            },
            ..FitConfig::default()
        };
        let mut seen = 0;
        let outcome = fit(&mut net, &Mse, &x, &y, &config, &mut rng, |_| seen += 1).unwrap();

        assert_eq!(seen, 60);
        assert_eq!(outcome.history.len(), 60);
        assert!(outcome.diverged_at_epoch.is_none());
        let first = outcome.history[0].loss;
        let last = outcome.last().unwrap().loss;
        assert!(last < first, "loss went from {first} to {last}");
    }

    #[test]
    fn test_non_finite_first_epoch_is_an_error() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut net = linear_net(&mut rng);
        let x = ArrayD::from_elem(vec![6, 1], f32::NAN);
        let y = Array2::zeros((6, 1));

        let err = fit(
            &mut net,
            &Mse,
            &x,
            &y,
            &FitConfig::default(),
            &mut rng,
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::TrainingDiverged { epoch: 1 }));
    }

    #[test]
    fn test_divergence_after_finite_epochs_restores_last_snapshot() {
        // 8 training samples in one batch plus one validation pass: two
        // loss calls per epoch
        let x = ArrayD::from_shape_fn(vec![10, 1], |i| i[0] as f32 / 10.0);
        let y = Array2::from_shape_fn((10, 1), |(i, _)| i as f32 / 10.0);
        let config = FitConfig {
            epochs: 5,
            ..FitConfig::default()
        };

        let mut rng = StdRng::seed_from_u64(21);
        let mut net = linear_net(&mut rng);
        let mut seen = Vec::new();
        let outcome = fit(
            &mut net,
            &DivergingMse::new(3, 2),
            &x,
            &y,
            &config,
            &mut rng,
            |m| seen.push(m.epoch),
        )
        .unwrap();

        assert_eq!(outcome.diverged_at_epoch, Some(3));
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(seen, vec![1, 2]);
        assert!(outcome.history.iter().all(|m| m.loss.is_finite()));

        // Same seed, stopped cleanly after two epochs
        let mut rng = StdRng::seed_from_u64(21);
        let mut reference = linear_net(&mut rng);
        let two_epochs = FitConfig {
            epochs: 2,
            ..config
        };
        fit(&mut reference, &Mse, &x, &y, &two_epochs, &mut rng, |_| {}).unwrap();

        let restored = net.flatten_weights();
        assert!(restored.iter().all(|w| w.is_finite()));
        assert_eq!(restored, reference.flatten_weights());
    }

    #[test]
    fn test_zero_epochs_is_rejected() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut net = linear_net(&mut rng);
        let x = ArrayD::zeros(vec![6, 1]);
        let y = Array2::zeros((6, 1));
        let config = FitConfig {
            epochs: 0,
            ..FitConfig::default()
        };

        let err = fit(&mut net, &Mse, &x, &y, &config, &mut rng, |_| {}).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfig(_)));
    }
}
