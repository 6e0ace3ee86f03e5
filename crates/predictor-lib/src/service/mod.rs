//! Model service
//!
//! This module provides:
//! - `ModelService`, the object the appraisal application calls into
//! - Per-kind readiness (`ModelState`) with an atomic swap after training
//! - Lazy loading of persisted artifacts on first use
//! - Training progress, metrics and lifecycle events
//!
//! Each model kind lives in its own slot. A slot is read-locked for
//! inference and write-locked only for the swap, so predictions keep
//! using the previous model while a new one is being trained.

mod config;

pub use config::ModelServiceConfig;

use crate::health::{Component, ComponentStatus, HealthRegistry};
use crate::models::{
    Classification, EpochMetrics, ImageSample, ItemAttributes, ModelKind, PredictionResult,
    TrainingReport, TrainingSample, FEATURE_COUNT,
};
use crate::nn::Sequential;
use crate::observability::{EventLogger, ModelMetrics};
use crate::persistence::{ModelStore, StoredModel};
use crate::preprocessing::{FeatureEncoder, NormalizationStats};
use crate::price::{PricePredictor, PriceModel, PriceTrainer, TrainedPriceModel};
use crate::progress::{ProgressEvent, ProgressSender};
use crate::registry::{ModelInfo, ModelStatus, Performance, StatusRegistry};
use crate::vision::{ImageModel, ImageStats, ImageTrainer, TrainedImageModel, CHANNELS};
use crate::{ModelError, Result};
use chrono::Utc;
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, Mutex as AsyncMutex, RwLock};
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// Readiness of one model slot
#[derive(Debug)]
pub enum ModelState<M> {
    /// Nothing trained or loaded yet
    Uninitialized,
    /// A training run is in flight; `previous` keeps serving meanwhile
    Training { previous: Option<Arc<M>> },
    Ready(Arc<M>),
}

impl<M> ModelState<M> {
    /// The model inference should use, if any
    pub fn model(&self) -> Option<Arc<M>> {
        match self {
            ModelState::Ready(model) | ModelState::Training { previous: Some(model) } => {
                Some(Arc::clone(model))
            }
            _ => None,
        }
    }

    pub fn is_training(&self) -> bool {
        matches!(self, ModelState::Training { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelState::Uninitialized => "uninitialized",
            ModelState::Training { .. } => "training",
            ModelState::Ready(_) => "ready",
        }
    }
}

/// What [`ModelService::warm_start`] found in the storage root
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmStartReport {
    pub loaded: Vec<ModelKind>,
    /// Kinds with no artifact on disk
    pub missing: Vec<ModelKind>,
    /// Kinds whose artifact could not be used, with the reason
    pub failed: Vec<(ModelKind, String)>,
}

impl WarmStartReport {
    pub fn is_ready(&self, kind: ModelKind) -> bool {
        self.loaded.contains(&kind)
    }
}

/// A network type the service can train, persist and serve
trait ServedModel: Send + Sync + Sized + 'static {
    type Stats: Serialize + DeserializeOwned + Send + Sync + 'static;

    const KIND: ModelKind;

    fn network(&self) -> &Sequential;

    fn stats(&self) -> &Self::Stats;

    /// Rebuild the in-memory model from a loaded artifact
    fn from_stored(stored: StoredModel<Self::Stats>) -> Result<Self>;
}

impl ServedModel for PriceModel {
    type Stats = NormalizationStats;

    const KIND: ModelKind = ModelKind::Price;

    fn network(&self) -> &Sequential {
        PriceModel::network(self)
    }

    fn stats(&self) -> &NormalizationStats {
        PriceModel::stats(self)
    }

    fn from_stored(stored: StoredModel<NormalizationStats>) -> Result<Self> {
        if stored.network.input_shape() != [FEATURE_COUNT] || stored.network.output_shape() != [1]
        {
            return Err(ModelError::ArtifactCorrupt(format!(
                "price network maps {:?} to {:?}, expected [{FEATURE_COUNT}] to [1]",
                stored.network.input_shape(),
                stored.network.output_shape()
            )));
        }
        let validation_loss = stored
            .status
            .performance
            .as_ref()
            .map(|p| p.validation_loss)
            .unwrap_or(0.0);
        Ok(PriceModel::new(stored.network, stored.stats, validation_loss))
    }
}

impl ServedModel for ImageModel {
    type Stats = ImageStats;

    const KIND: ModelKind = ModelKind::Image;

    fn network(&self) -> &Sequential {
        ImageModel::network(self)
    }

    fn stats(&self) -> &ImageStats {
        ImageModel::stats(self)
    }

    fn from_stored(stored: StoredModel<ImageStats>) -> Result<Self> {
        let expected_input = stored.stats.input_shape();
        let expected_output = [stored.stats.categories.len()];
        if stored.network.input_shape() != expected_input.as_slice()
            || stored.network.output_shape() != expected_output
        {
            return Err(ModelError::ArtifactCorrupt(format!(
                "image network maps {:?} to {:?}, statistics expect {:?} to {:?}",
                stored.network.input_shape(),
                stored.network.output_shape(),
                expected_input,
                expected_output
            )));
        }
        Ok(ImageModel::new(stored.network, stored.stats))
    }
}

/// Output of a trainer, before the service versions and persists it
struct TrainedModel<M> {
    model: M,
    history: Vec<EpochMetrics>,
    diverged_at_epoch: Option<usize>,
    sample_count: usize,
    feature_count: usize,
    performance: Performance,
}

struct Slot<M> {
    state: RwLock<ModelState<M>>,
    /// Serializes trainings and loads of this kind
    training: AsyncMutex<()>,
}

impl<M> Slot<M> {
    fn new() -> Self {
        Self {
            state: RwLock::new(ModelState::Uninitialized),
            training: AsyncMutex::new(()),
        }
    }
}

/// The predictive modeling service
pub struct ModelService {
    config: ModelServiceConfig,
    encoder: FeatureEncoder,
    store: ModelStore,
    registry: RwLock<StatusRegistry>,
    price: Slot<PriceModel>,
    image: Slot<ImageModel>,
    /// Master generator; every operation forks its own stream from it
    rng: Mutex<StdRng>,
    progress: ProgressSender,
    metrics: ModelMetrics,
    events: EventLogger,
    health: Option<HealthRegistry>,
}

impl ModelService {
    /// Create a service over `config.storage_dir`. Nothing is read from
    /// disk until first use or [`ModelService::warm_start`].
    pub fn new(config: ModelServiceConfig) -> Result<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            encoder: FeatureEncoder::new(config.vocabularies.clone()),
            store: ModelStore::new(config.storage_dir.clone()),
            registry: RwLock::new(StatusRegistry::new()),
            price: Slot::new(),
            image: Slot::new(),
            rng: Mutex::new(rng),
            progress: ProgressSender::default(),
            metrics: ModelMetrics::new(),
            events: EventLogger::new("model-service"),
            health: None,
            config,
        })
    }

    /// Report slot readiness to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &ModelServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Load every persisted model from the storage root.
    ///
    /// Missing or unusable artifacts are reported, not returned as errors;
    /// the affected kind stays uninitialized.
    pub async fn warm_start(&self) -> WarmStartReport {
        let root = self.store.root().to_path_buf();
        match tokio::fs::create_dir_all(&root).await {
            Ok(()) => {
                self.set_health(Component::Storage, ComponentStatus::Healthy, None)
                    .await
            }
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Storage root is not usable");
                self.set_health(
                    Component::Storage,
                    ComponentStatus::Unhealthy,
                    Some(e.to_string()),
                )
                .await;
            }
        }

        let mut report = WarmStartReport::default();
        for kind in ModelKind::ALL {
            let outcome = match kind {
                ModelKind::Price => self.ensure_loaded(&self.price).await.map(|_| ()),
                ModelKind::Image => self.ensure_loaded(&self.image).await.map(|_| ()),
            };
            match outcome {
                Ok(()) => report.loaded.push(kind),
                Err(ModelError::ModelNotInitialized(_)) => {
                    self.set_health(
                        kind.into(),
                        ComponentStatus::Degraded,
                        Some("not trained".to_string()),
                    )
                    .await;
                    report.missing.push(kind);
                }
                Err(e) => {
                    warn!(model = %kind, error = %e, "Persisted model could not be loaded");
                    self.set_health(kind.into(), ComponentStatus::Degraded, Some(e.to_string()))
                        .await;
                    report.failed.push((kind, e.to_string()));
                }
            }
        }

        info!(
            loaded = ?report.loaded,
            missing = ?report.missing,
            failed = report.failed.len(),
            "Warm start finished"
        );
        report
    }

    /// Snapshot of both models' status
    pub async fn get_model_info(&self) -> ModelInfo {
        self.registry.read().await.snapshot()
    }

    /// Whether `kind` currently has a model to serve
    pub async fn is_ready(&self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Price => self.price.state.read().await.model().is_some(),
            ModelKind::Image => self.image.state.read().await.model().is_some(),
        }
    }

    /// `uninitialized`, `training` or `ready`
    pub async fn state_label(&self, kind: ModelKind) -> &'static str {
        match kind {
            ModelKind::Price => self.price.state.read().await.label(),
            ModelKind::Image => self.image.state.read().await.label(),
        }
    }

    /// Train a fresh price model and swap it in.
    ///
    /// `epochs` overrides the configured default for this run only.
    pub async fn train_price_model(
        &self,
        samples: Vec<TrainingSample>,
        epochs: Option<usize>,
    ) -> Result<TrainingReport> {
        let encoder = self.encoder.clone();
        let config = self.config.price;
        let sample_count = samples.len();
        let epochs = self.track_error(ModelKind::Price, resolve_epochs(epochs, config.epochs))?;

        self.train_slot(
            &self.price,
            sample_count,
            epochs,
            move |rng, on_epoch| {
                let trained = PriceTrainer::new(&encoder, &config).train(
                    &samples,
                    Some(epochs),
                    rng,
                    on_epoch,
                )?;
                let performance = Performance {
                    validation_loss: trained.final_validation_loss(),
                    training_loss: trained.final_loss(),
                    accuracy: None,
                    feature_importance: trained.feature_importance.clone(),
                };
                let TrainedPriceModel { model, outcome, .. } = trained;
                Ok(TrainedModel {
                    model,
                    history: outcome.history,
                    diverged_at_epoch: outcome.diverged_at_epoch,
                    sample_count,
                    feature_count: FEATURE_COUNT,
                    performance,
                })
            },
        )
        .await
    }

    /// Train a fresh image classifier and swap it in.
    pub async fn train_image_model(
        &self,
        samples: Vec<ImageSample>,
        epochs: Option<usize>,
    ) -> Result<TrainingReport> {
        let config = self.config.image;
        let categories = self.config.vocabularies.category.clone();
        let sample_count = samples.len();
        let side = config.image_size as usize;
        let epochs = self.track_error(ModelKind::Image, resolve_epochs(epochs, config.epochs))?;

        self.train_slot(
            &self.image,
            sample_count,
            epochs,
            move |rng, on_epoch| {
                let trained = ImageTrainer::new(&config, &categories)
                    .train(&samples, Some(epochs), rng, on_epoch)?;
                let performance = Performance {
                    validation_loss: trained.final_validation_loss(),
                    training_loss: trained.final_loss(),
                    accuracy: trained.final_validation_accuracy(),
                    feature_importance: Vec::new(),
                };
                let TrainedImageModel { model, outcome } = trained;
                Ok(TrainedModel {
                    model,
                    history: outcome.history,
                    diverged_at_epoch: outcome.diverged_at_epoch,
                    sample_count,
                    feature_count: CHANNELS * side * side,
                    performance,
                })
            },
        )
        .await
    }

    /// Monte Carlo dropout predictions, one per item
    pub async fn predict_price(&self, items: &[ItemAttributes]) -> Result<Vec<PredictionResult>> {
        let result = async {
            let model = self.ensure_loaded(&self.price).await?;
            let started = Instant::now();
            let mut rng = self.fork_rng();
            let results =
                PricePredictor::with_config(self.config.predictor).predict(&model, items, &mut rng)?;
            self.metrics.observe_prediction(
                ModelKind::Price,
                started.elapsed().as_secs_f64(),
                items.len(),
            );
            Ok::<_, ModelError>(results)
        }
        .await;
        self.track_error(ModelKind::Price, result)
    }

    /// Single pass with dropout off; denormalized prices, one per item
    pub async fn predict_price_deterministic(&self, items: &[ItemAttributes]) -> Result<Vec<f32>> {
        let model = self.ensure_loaded(&self.price).await?;
        self.track_error(ModelKind::Price, model.predict_items_deterministic(items))
    }

    /// Decode an encoded image (PNG, JPEG, ...) and classify it
    pub async fn classify_image(&self, image_bytes: &[u8]) -> Result<Classification> {
        let decoded = image::load_from_memory(image_bytes).map_err(ModelError::from);
        match self.track_error(ModelKind::Image, decoded) {
            Ok(image) => self.classify_decoded(&image).await,
            Err(e) => Err(e),
        }
    }

    pub async fn classify_decoded(&self, image: &DynamicImage) -> Result<Classification> {
        let result = async {
            let model = self.ensure_loaded(&self.image).await?;
            let started = Instant::now();
            let classification = model.classify(image)?;
            self.metrics
                .observe_prediction(ModelKind::Image, started.elapsed().as_secs_f64(), 1);
            Ok::<_, ModelError>(classification)
        }
        .await;
        self.track_error(ModelKind::Image, result)
    }

    /// Load the artifacts of `kind` from `dir` and serve them.
    ///
    /// When `dir` is not the storage root, the artifact is also written to
    /// the storage root so it survives a restart.
    pub async fn load_model(&self, kind: ModelKind, dir: impl AsRef<Path>) -> Result<ModelStatus> {
        let dir = dir.as_ref().to_path_buf();
        let result = match kind {
            ModelKind::Price => self.load_into(&self.price, dir).await,
            ModelKind::Image => self.load_into(&self.image, dir).await,
        };
        self.track_error(kind, result)
    }

    /// Raw receiver of training progress events
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Training progress as a stream; lagging consumers skip events
    pub fn progress_stream(&self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        self.progress.stream()
    }

    fn fork_rng(&self) -> StdRng {
        let mut master = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        StdRng::seed_from_u64(master.next_u64())
    }

    fn track_error<T>(&self, kind: ModelKind, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.metrics.inc_error(kind, e.kind_label());
        }
        result
    }

    /// The served model of `slot`, loading it from the storage root if the
    /// slot is still uninitialized.
    async fn ensure_loaded<M: ServedModel>(&self, slot: &Slot<M>) -> Result<Arc<M>> {
        if let Some(model) = slot.state.read().await.model() {
            return Ok(model);
        }

        let mut state = slot.state.write().await;
        if let Some(model) = state.model() {
            return Ok(model);
        }
        if state.is_training() {
            return Err(ModelError::ModelNotInitialized(M::KIND));
        }

        let store = self.store.clone();
        let (model, status) = run_blocking(move || {
            let stored = store.load::<M::Stats>(M::KIND)?;
            let status = stored.status.clone();
            Ok((M::from_stored(stored)?, status))
        })
        .await?;

        let model = Arc::new(model);
        self.events.log_model_loaded(
            M::KIND,
            &status.version,
            &self.store.root().display().to_string(),
        );
        self.activate(&mut state, Arc::clone(&model), status).await;
        Ok(model)
    }

    async fn load_into<M: ServedModel>(&self, slot: &Slot<M>, dir: PathBuf) -> Result<ModelStatus> {
        let _exclusive = slot.training.lock().await;

        let source = ModelStore::new(dir.clone());
        let store = self.store.clone();
        let (model, status) = run_blocking(move || {
            let stored = source.load::<M::Stats>(M::KIND)?;
            let status = stored.status.clone();
            let model = M::from_stored(stored)?;
            if !same_dir(source.root(), store.root()) {
                store.save(M::KIND, model.network(), model.stats(), &status)?;
            }
            Ok((model, status))
        })
        .await?;

        self.events
            .log_model_loaded(M::KIND, &status.version, &dir.display().to_string());
        let mut state = slot.state.write().await;
        self.activate(&mut state, Arc::new(model), status.clone())
            .await;
        Ok(status)
    }

    /// Install `model` as the served model and record its status
    async fn activate<M: ServedModel>(
        &self,
        state: &mut ModelState<M>,
        model: Arc<M>,
        status: ModelStatus,
    ) {
        self.metrics.set_model_version(M::KIND, &status.version);
        self.registry.write().await.restore(M::KIND, status);
        *state = ModelState::Ready(model);
        self.set_health(M::KIND.into(), ComponentStatus::Healthy, None)
            .await;
    }

    async fn train_slot<M, F>(
        &self,
        slot: &Slot<M>,
        sample_count: usize,
        epochs: usize,
        job: F,
    ) -> Result<TrainingReport>
    where
        M: ServedModel,
        F: FnOnce(&mut StdRng, &dyn Fn(&EpochMetrics)) -> Result<TrainedModel<M>> + Send + 'static,
    {
        let kind = M::KIND;
        let _exclusive = slot.training.lock().await;

        // A persisted model must be known before training so the version
        // continues from it instead of restarting.
        if self.store.has_model(kind) {
            if let Err(e) = self.ensure_loaded(slot).await {
                warn!(model = %kind, error = %e, "Ignoring unusable persisted model");
            }
        }

        let previous = {
            let mut state = slot.state.write().await;
            let previous = state.model();
            *state = ModelState::Training {
                previous: previous.clone(),
            };
            previous
        };

        self.events.log_training_started(kind, sample_count, epochs);
        self.progress.send(ProgressEvent::Started {
            model: kind,
            samples: sample_count,
            epochs,
        });

        let result = self.fit_and_activate(slot, job).await;
        if let Err(e) = &result {
            *slot.state.write().await = match previous {
                Some(model) => ModelState::Ready(model),
                None => ModelState::Uninitialized,
            };
            if let ModelError::TrainingDiverged { epoch } = e {
                self.record_divergence(kind, *epoch, false);
            }
            self.metrics.inc_error(kind, e.kind_label());
            self.events
                .log_training_failed(kind, e.kind_label(), &e.to_string());
        }
        result
    }

    async fn fit_and_activate<M, F>(&self, slot: &Slot<M>, job: F) -> Result<TrainingReport>
    where
        M: ServedModel,
        F: FnOnce(&mut StdRng, &dyn Fn(&EpochMetrics)) -> Result<TrainedModel<M>> + Send + 'static,
    {
        let kind = M::KIND;
        let started = Instant::now();

        let progress = self.progress.clone();
        let mut rng = self.fork_rng();
        let trained = run_blocking(move || {
            let on_epoch = |metrics: &EpochMetrics| {
                progress.send(ProgressEvent::Epoch {
                    model: kind,
                    metrics: metrics.clone(),
                })
            };
            job(&mut rng, &on_epoch)
        })
        .await?;

        if !trained.performance.is_finite() {
            return Err(ModelError::Task(format!(
                "{kind} training produced non-finite performance figures"
            )));
        }
        if let Some(epoch) = trained.diverged_at_epoch {
            self.record_divergence(kind, epoch, true);
        }

        let status = self.registry.read().await.next_status(
            kind,
            trained.performance.clone(),
            Utc::now(),
        );

        let model = Arc::new(trained.model);
        let store = self.store.clone();
        let to_save = Arc::clone(&model);
        let saved_status = status.clone();
        run_blocking(move || store.save(kind, to_save.network(), to_save.stats(), &saved_status))
            .await?;

        {
            let mut state = slot.state.write().await;
            self.activate(&mut state, model, status.clone()).await;
        }

        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        self.metrics.observe_training(kind, elapsed.as_secs_f64());
        self.events.log_training_completed(
            kind,
            &status.version,
            trained.performance.training_loss,
            trained.performance.validation_loss,
            duration_ms,
        );
        self.progress.send(ProgressEvent::Completed {
            model: kind,
            version: status.version.clone(),
            duration_ms,
        });
        debug!(model = %kind, epochs = trained.history.len(), "Training run recorded");

        Ok(TrainingReport {
            model: kind,
            history: trained.history,
            sample_count: trained.sample_count,
            feature_count: trained.feature_count,
            final_loss: trained.performance.training_loss,
            final_validation_loss: trained.performance.validation_loss,
            feature_importance: trained.performance.feature_importance,
            version: status.version,
            diverged_at_epoch: trained.diverged_at_epoch,
            duration_ms,
        })
    }

    fn record_divergence(&self, kind: ModelKind, epoch: usize, recovered: bool) {
        self.metrics.inc_training_diverged(kind);
        self.events.log_training_diverged(kind, epoch, recovered);
        self.progress.send(ProgressEvent::Diverged { model: kind, epoch });
    }

    async fn set_health(&self, component: Component, status: ComponentStatus, detail: Option<String>) {
        if let Some(health) = &self.health {
            health.set(component, status, detail).await;
        }
    }
}

/// Per-run override or configured default; zero epochs would leave the
/// network untrained.
fn resolve_epochs(requested: Option<usize>, default: usize) -> Result<usize> {
    match requested.unwrap_or(default) {
        0 => Err(ModelError::InvalidConfig("epochs must be at least 1".to_string())),
        epochs => Ok(epochs),
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Run CPU-bound or filesystem work off the async workers
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ModelError::Task(e.to_string()))?
}
