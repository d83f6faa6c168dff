//! Fold-parallel training of a batch of submissions.
//!
//! Every (submission, fold) pair becomes one tokio task; a shared semaphore
//! bounds how many run at once. Tasks only return plain [`FoldOutcome`]s.
//! Submission records are written after the whole batch has joined, so a
//! failing fold can never disturb its siblings or other submissions.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn, Instrument};
use uuid::Uuid;

use ramp_state::fakes::MemoryArtifactStore;
use ramp_state::{ArtifactStore, FsArtifactStore};

use crate::config::RampConfig;
use crate::domain::dataset::Dataset;
use crate::domain::error::{truncate_error_message, RampError, Result};
use crate::domain::score::ScoreType;
use crate::domain::state::{Stage, SubmissionState};
use crate::domain::submission::{FoldOutcome, Submission, SubmissionId};
use crate::executor::{join_error_message, FoldExecutor, FoldTask};
use crate::metrics::METRICS;
use crate::obs::{self, BatchSpan};
use crate::provider::ProviderRegistry;

/// Knobs for one scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of fold tasks running at once.
    pub max_concurrent: usize,
    /// Last stage to run on every fold.
    pub through: Stage,
    /// Re-run submissions that are already `tested`.
    pub force_retrain: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            through: Stage::Test,
            force_retrain: false,
        }
    }
}

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Fold tasks spawned.
    pub tasks: usize,
    /// Fold tasks that reached the requested stage.
    pub succeeded: usize,
    /// Fold tasks that ended in an error state.
    pub failed: usize,
    /// Submissions left alone (ignored, or already tested).
    pub skipped: Vec<SubmissionId>,
    /// Submissions whose provider was missing or failed its check.
    pub check_failures: Vec<SubmissionId>,
    /// Resulting state of every submission that was trained.
    pub states: Vec<(SubmissionId, SubmissionState)>,
}

/// Runs batches of submissions through a [`FoldExecutor`].
#[derive(Clone)]
pub struct Scheduler {
    executor: FoldExecutor,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(executor: FoldExecutor, config: SchedulerConfig) -> Self {
        Self { executor, config }
    }

    /// Scheduler over `dataset` with the artifact store named by
    /// `config.store`: a directory when `root` is set, memory otherwise.
    pub fn from_config(
        config: &RampConfig,
        dataset: Arc<Dataset>,
        score_type: Arc<dyn ScoreType>,
    ) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn ArtifactStore> = match &config.store.root {
            Some(root) => {
                info!(root = %root.display(), "using filesystem artifact store");
                Arc::new(FsArtifactStore::new(root)?)
            }
            None => {
                info!("using in-memory artifact store");
                Arc::new(MemoryArtifactStore::new())
            }
        };
        let executor = FoldExecutor::new(store, dataset, score_type);
        Ok(Self::new(executor, config.scheduler.clone()))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Train, validate and test `submissions` on every fold of the dataset.
    ///
    /// Submissions flagged `ignore`, or already `tested` without
    /// `force_retrain`, are skipped. A missing provider or a failed
    /// `check()` puts the submission in `checking_error` without scheduling
    /// any fold.
    #[instrument(skip_all, fields(submissions = submissions.len()))]
    pub async fn train_test_submissions(
        &self,
        submissions: &mut [Submission],
        providers: &ProviderRegistry,
    ) -> BatchReport {
        let batch = BatchSpan::new();
        let span = batch.span();
        self.run_batch(batch, submissions, providers)
            .instrument(span)
            .await
    }

    async fn run_batch(
        &self,
        batch: BatchSpan,
        submissions: &mut [Submission],
        providers: &ProviderRegistry,
    ) -> BatchReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let mut report = BatchReport {
            batch_id: batch.batch_id(),
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            tasks: 0,
            succeeded: 0,
            failed: 0,
            skipped: Vec::new(),
            check_failures: Vec::new(),
            states: Vec::new(),
        };

        let folds: Vec<Arc<_>> = self
            .executor
            .dataset()
            .folds()
            .iter()
            .cloned()
            .map(Arc::new)
            .collect();

        let mut scheduled = Vec::new();
        for (sub_idx, submission) in submissions.iter_mut().enumerate() {
            if submission.ignore
                || (submission.state == SubmissionState::Tested && !self.config.force_retrain)
            {
                info!(
                    submission = %submission.full_name(),
                    state = %submission.state,
                    "skipping submission"
                );
                report.skipped.push(submission.id.clone());
                continue;
            }
            let Some(provider) = providers.get(&submission.id) else {
                let msg = RampError::ProviderMissing(submission.full_name()).to_string();
                warn!(submission = %submission.full_name(), "{msg}");
                submission.set_error(SubmissionState::CheckingError, &msg);
                report.check_failures.push(submission.id.clone());
                continue;
            };
            if let Err(e) = provider.check() {
                warn!(submission = %submission.full_name(), error = %e, "submission check failed");
                submission.set_error(
                    SubmissionState::CheckingError,
                    &truncate_error_message(&e.to_string()),
                );
                report.check_failures.push(submission.id.clone());
                continue;
            }
            // Results of an earlier run never survive a re-run.
            submission.reset();
            submission.set_state(SubmissionState::Checked);
            scheduled.push((sub_idx, provider));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut handles = Vec::new();
        for (sub_idx, provider) in &scheduled {
            let submission = &submissions[*sub_idx];
            for (fold_pos, on_fold) in submission.on_folds.iter().enumerate() {
                let Some(fold) = folds.get(on_fold.fold_index) else {
                    warn!(
                        submission = %submission.full_name(),
                        fold = on_fold.fold_index,
                        "fold record points past the dataset folds"
                    );
                    continue;
                };
                let task = FoldTask {
                    submission_id: submission.id.clone(),
                    submission_name: submission.full_name(),
                    fold_index: on_fold.fold_index,
                    fold: Arc::clone(fold),
                    provider: Arc::clone(provider),
                    through: self.config.through,
                };
                let executor = self.executor.clone();
                let semaphore = Arc::clone(&semaphore);
                let handle = tokio::spawn(
                    async move {
                        let _permit = semaphore.acquire_owned().await.ok();
                        executor.run(task).await
                    }
                    .in_current_span(),
                );
                handles.push((*sub_idx, fold_pos, handle));
            }
        }
        report.tasks = handles.len();
        obs::emit_batch_started(batch.batch_id(), scheduled.len(), report.tasks);

        let mut outcomes = Vec::with_capacity(handles.len());
        for (sub_idx, fold_pos, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    METRICS.inc_fold_failures();
                    let submission = &submissions[sub_idx];
                    FoldOutcome::failed(
                        submission.id.clone(),
                        submission.on_folds[fold_pos].fold_index,
                        Stage::Train.error_state(),
                        truncate_error_message(&join_error_message(e)),
                    )
                }
            };
            outcomes.push((sub_idx, fold_pos, outcome));
        }

        // Every task has returned; only now are submission records touched.
        for (sub_idx, fold_pos, outcome) in outcomes {
            if outcome.state.is_error() {
                report.failed += 1;
            } else {
                report.succeeded += 1;
            }
            submissions[sub_idx].on_folds[fold_pos].update(outcome);
        }
        for (sub_idx, _) in &scheduled {
            let submission = &mut submissions[*sub_idx];
            submission.set_state_after_training();
            obs::emit_submission_state(&submission.full_name(), submission.state);
            report
                .states
                .push((submission.id.clone(), submission.state));
        }

        report.finished_at = Utc::now();
        report.duration_ms = started.elapsed().as_millis() as u64;
        obs::emit_batch_finished(
            report.batch_id,
            report.succeeded,
            report.failed,
            report.duration_ms,
        );
        METRICS.flush();
        report
    }
}
