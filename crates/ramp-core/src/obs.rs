//! Structured lifecycle events for training batches and leaderboard builds.
//!
//! Every event carries an `event` field (`batch.started`, `fold.finished`,
//! ...) so log pipelines can filter on it. Batch-scoped work runs inside the
//! span of a [`BatchSpan`].

use tracing::{info, warn, Span};
use uuid::Uuid;

use crate::domain::state::SubmissionState;

/// Identifies one scheduler pass and owns its tracing span.
#[derive(Debug, Clone)]
pub struct BatchSpan {
    batch_id: Uuid,
    span: Span,
}

impl BatchSpan {
    /// Fresh batch id with a `ramp.batch` span tagged by it.
    pub fn new() -> Self {
        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("ramp.batch", batch_id = %batch_id);
        Self { batch_id, span }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Span to instrument batch futures with.
    pub fn span(&self) -> Span {
        self.span.clone()
    }
}

impl Default for BatchSpan {
    fn default() -> Self {
        Self::new()
    }
}

pub fn emit_batch_started(batch_id: Uuid, submissions: usize, tasks: usize) {
    info!(
        event = "batch.started",
        batch_id = %batch_id,
        submissions = submissions,
        tasks = tasks,
    );
}

pub fn emit_batch_finished(batch_id: Uuid, succeeded: usize, failed: usize, duration_ms: u64) {
    info!(
        event = "batch.finished",
        batch_id = %batch_id,
        succeeded = succeeded,
        failed = failed,
        duration_ms = duration_ms,
    );
}

/// One (submission, fold) task returned. Error states log at `warn`.
pub fn emit_fold_finished(
    submission: &str,
    fold_index: usize,
    state: SubmissionState,
    duration_ms: u64,
) {
    if state.is_error() {
        warn!(
            event = "fold.finished",
            submission = %submission,
            fold = fold_index,
            state = %state,
            duration_ms = duration_ms,
        );
    } else {
        info!(
            event = "fold.finished",
            submission = %submission,
            fold = fold_index,
            state = %state,
            duration_ms = duration_ms,
        );
    }
}

pub fn emit_submission_state(submission: &str, state: SubmissionState) {
    info!(event = "submission.state", submission = %submission, state = %state);
}

pub fn emit_ensemble_selected(fold_index: usize, size: usize, combined_score: f64) {
    info!(
        event = "ensemble.selected",
        fold = fold_index,
        size = size,
        combined_score = combined_score,
    );
}

/// A store write failed; the fold carries on without the cached artifact.
pub fn emit_persist_failed(artifact: &str, error: &dyn std::fmt::Display) {
    warn!(event = "artifact.persist_failed", artifact = %artifact, error = %error);
}
