//! Per-fold train → validate → test pipeline.
//!
//! [`FoldExecutor::run`] never fails: every problem ends up as an error state
//! on the returned [`FoldOutcome`]. Provider code runs on blocking threads so
//! a panicking model only fails its own fold.
//!
//! Trained models, predictions and times are written through the
//! [`ArtifactStore`]. A stored model for the same (submission, fold identity)
//! is reused when it loads cleanly; any read problem means a fresh fit. Write
//! problems are logged and otherwise ignored.

use std::sync::Arc;
use std::time::Instant;

use ramp_state::{ArtifactKey, ArtifactStore, PredictionKind, StorageError, TimingKind};
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::domain::dataset::Dataset;
use crate::domain::error::{truncate_error_message, ProviderError, RampError, Result};
use crate::domain::fold::FoldSpec;
use crate::domain::predictions::Predictions;
use crate::domain::score::ScoreType;
use crate::domain::state::Stage;
use crate::domain::submission::{FoldOutcome, SubmissionId};
use crate::metrics::METRICS;
use crate::obs;
use crate::provider::{ModelArtifact, ModelProvider};

/// Everything a worker needs to run one submission on one fold.
#[derive(Clone)]
pub struct FoldTask {
    pub submission_id: SubmissionId,
    pub submission_name: String,
    pub fold_index: usize,
    pub fold: Arc<FoldSpec>,
    pub provider: Arc<dyn ModelProvider>,
    /// Last stage to run.
    pub through: Stage,
}

impl std::fmt::Debug for FoldTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FoldTask")
            .field("submission", &self.submission_name)
            .field("fold_index", &self.fold_index)
            .field("fold", &self.fold.identity())
            .field("through", &self.through)
            .finish()
    }
}

/// Runs fold tasks against a shared dataset and artifact store.
#[derive(Clone)]
pub struct FoldExecutor {
    store: Arc<dyn ArtifactStore>,
    dataset: Arc<Dataset>,
    score_type: Arc<dyn ScoreType>,
}

impl FoldExecutor {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        dataset: Arc<Dataset>,
        score_type: Arc<dyn ScoreType>,
    ) -> Self {
        Self {
            store,
            dataset,
            score_type,
        }
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn score_type(&self) -> &Arc<dyn ScoreType> {
        &self.score_type
    }

    /// Run `task` up to and including `task.through`.
    pub async fn run(&self, task: FoldTask) -> FoldOutcome {
        let started = Instant::now();
        METRICS.inc_folds_executed();
        let key = ArtifactKey::new(task.submission_id.as_str(), task.fold.identity());

        let mut outcome = FoldOutcome {
            submission_id: Some(task.submission_id.clone()),
            fold_index: task.fold_index,
            ..Default::default()
        };
        self.run_stages(&task, &key, &mut outcome).await;

        obs::emit_fold_finished(
            &task.submission_name,
            task.fold_index,
            outcome.state,
            started.elapsed().as_millis() as u64,
        );
        outcome
    }

    async fn run_stages(&self, task: &FoldTask, key: &ArtifactKey, outcome: &mut FoldOutcome) {
        let (model, train_time) = match self.train(task, key).await {
            Ok(trained) => trained,
            Err(e) => return fail(task, outcome, Stage::Train, e),
        };
        outcome.state = Stage::Train.done_state();
        outcome.train_time = Some(train_time);
        if task.through == Stage::Train {
            return;
        }

        if let Err(e) = self.validate(task, key, &model, outcome).await {
            return fail(task, outcome, Stage::Validate, e);
        }
        outcome.state = Stage::Validate.done_state();
        if task.through == Stage::Validate {
            return;
        }

        if let Err(e) = self.test(task, key, &model, outcome).await {
            return fail(task, outcome, Stage::Test, e);
        }
        outcome.state = Stage::Test.done_state();
    }

    async fn train(
        &self,
        task: &FoldTask,
        key: &ArtifactKey,
    ) -> Result<(Arc<ModelArtifact>, f64)> {
        if let Some(cached) = self.load_cached(task, key).await {
            return Ok(cached);
        }

        let (x, y) = self
            .dataset
            .train_subset(task.fold.train_is())
            .map_err(|e| RampError::Train(e.to_string()))?;
        let provider = Arc::clone(&task.provider);
        let started = Instant::now();
        let artifact = tokio::task::spawn_blocking(move || provider.fit(&x, &y))
            .await
            .map_err(|e| RampError::Train(join_error_message(e)))?
            .map_err(|e| RampError::Train(e.to_string()))?;
        let elapsed = started.elapsed().as_secs_f64();

        if let Err(e) = self.store.store_model(key, artifact.as_bytes()).await {
            obs::emit_persist_failed(&format!("{key}/model"), &e);
        }
        self.persist_time(key, TimingKind::Train, elapsed).await;
        Ok((Arc::new(artifact), elapsed))
    }

    /// A stored model and its train time, if both load and the provider
    /// accepts the model.
    async fn load_cached(
        &self,
        task: &FoldTask,
        key: &ArtifactKey,
    ) -> Option<(Arc<ModelArtifact>, f64)> {
        let bytes = match self.store.load_model(key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound { .. }) => return None,
            Err(e) => {
                warn!(artifact = %key, error = %e, "cached model unreadable, retraining");
                METRICS.inc_retrains();
                // A corrupt model is dropped; an I/O failure may be transient.
                if e.is_miss() {
                    self.discard_model(key).await;
                }
                return None;
            }
        };
        let artifact = ModelArtifact::new(bytes);
        if let Err(e) = task.provider.restore(&artifact) {
            warn!(artifact = %key, error = %e, "cached model rejected, retraining");
            METRICS.inc_retrains();
            self.discard_model(key).await;
            return None;
        }
        match self.store.load_time(key, TimingKind::Train).await {
            Ok(train_time) => {
                debug!(artifact = %key, "reusing cached model");
                METRICS.inc_cache_hits();
                Some((Arc::new(artifact), train_time))
            }
            Err(e) => {
                warn!(artifact = %key, error = %e, "cached train time missing, retraining");
                METRICS.inc_retrains();
                None
            }
        }
    }

    fn target_columns(&self) -> usize {
        self.dataset.y_train().n_columns()
    }

    async fn discard_model(&self, key: &ArtifactKey) {
        if let Err(e) = self.store.delete_model(key).await {
            obs::emit_persist_failed(&format!("{key}/model"), &e);
        }
    }

    async fn validate(
        &self,
        task: &FoldTask,
        key: &ArtifactKey,
        model: &Arc<ModelArtifact>,
        outcome: &mut FoldOutcome,
    ) -> Result<()> {
        let dataset = Arc::clone(&self.dataset);
        let (predictions, elapsed) = self
            .predict(task, model, move |p, m| p.predict(m, dataset.x_train()))
            .await?;
        check_shape(&predictions, self.dataset.n_train(), self.target_columns())?;

        self.persist_predictions(key, PredictionKind::FullTrain, &predictions)
            .await;
        self.persist_time(key, TimingKind::Valid, elapsed).await;

        let y_train = self.dataset.y_train();
        outcome.train_score = Some(self.score_type.compute(
            y_train,
            &predictions,
            Some(task.fold.train_is()),
        ));
        outcome.valid_score = Some(self.score_type.compute(
            y_train,
            &predictions,
            Some(task.fold.test_is()),
        ));
        outcome.valid_time = Some(elapsed);
        outcome.full_train_predictions = Some(predictions);
        Ok(())
    }

    async fn test(
        &self,
        task: &FoldTask,
        key: &ArtifactKey,
        model: &Arc<ModelArtifact>,
        outcome: &mut FoldOutcome,
    ) -> Result<()> {
        let dataset = Arc::clone(&self.dataset);
        let (predictions, elapsed) = self
            .predict(task, model, move |p, m| p.predict(m, dataset.x_test()))
            .await?;
        check_shape(&predictions, self.dataset.n_test(), self.target_columns())?;

        self.persist_predictions(key, PredictionKind::Test, &predictions)
            .await;
        self.persist_time(key, TimingKind::Test, elapsed).await;

        outcome.test_score = self
            .dataset
            .y_test()
            .map(|y_test| self.score_type.compute(y_test, &predictions, None));
        outcome.test_time = Some(elapsed);
        outcome.test_predictions = Some(predictions);
        Ok(())
    }

    async fn predict<F>(
        &self,
        task: &FoldTask,
        model: &Arc<ModelArtifact>,
        call: F,
    ) -> Result<(Predictions, f64)>
    where
        F: FnOnce(&dyn ModelProvider, &ModelArtifact) -> std::result::Result<Predictions, ProviderError>
            + Send
            + 'static,
    {
        let provider = Arc::clone(&task.provider);
        let model = Arc::clone(model);
        let started = Instant::now();
        let predictions = tokio::task::spawn_blocking(move || call(provider.as_ref(), model.as_ref()))
            .await
            .map_err(|e| RampError::Predict(join_error_message(e)))?
            .map_err(|e| RampError::Predict(e.to_string()))?;
        Ok((predictions, started.elapsed().as_secs_f64()))
    }

    async fn persist_predictions(
        &self,
        key: &ArtifactKey,
        kind: PredictionKind,
        predictions: &Predictions,
    ) {
        let label = format!("{key}/{}", kind.as_str());
        match serde_json::to_vec(predictions) {
            Ok(bytes) => {
                if let Err(e) = self.store.store_predictions(key, kind, &bytes).await {
                    obs::emit_persist_failed(&label, &e);
                }
            }
            Err(e) => obs::emit_persist_failed(&label, &e),
        }
    }

    async fn persist_time(&self, key: &ArtifactKey, kind: TimingKind, seconds: f64) {
        if let Err(e) = self.store.store_time(key, kind, seconds).await {
            obs::emit_persist_failed(&format!("{key}/{}", kind.as_str()), &e);
        }
    }
}

fn fail(task: &FoldTask, outcome: &mut FoldOutcome, stage: Stage, error: RampError) {
    METRICS.inc_fold_failures();
    warn!(
        submission = %task.submission_name,
        fold = task.fold_index,
        stage = %stage,
        error = %error,
        "fold stage failed"
    );
    outcome.state = stage.error_state();
    outcome.error_msg = Some(truncate_error_message(&error.to_string()));
}

/// Predictions must have one row per input and one column per target column.
fn check_shape(predictions: &Predictions, rows: usize, columns: usize) -> Result<()> {
    let n = predictions.n_samples();
    if n != rows || (n > 0 && predictions.n_columns() != columns) {
        return Err(RampError::ShapeMismatch {
            expected: format!("{rows}x{columns}"),
            actual: predictions.shape(),
        });
    }
    Ok(())
}

/// Text of a worker panic, or the cancellation reason.
pub(crate) fn join_error_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("model panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("model panicked: {s}")
    } else {
        "model panicked".to_string()
    }
}
