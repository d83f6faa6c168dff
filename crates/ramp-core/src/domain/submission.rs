//! Submissions and their per-fold records.
//!
//! A [`Submission`] owns one [`SubmissionOnFold`] per cross-validation fold.
//! Fold records are written back from [`FoldOutcome`]s once a batch returns,
//! then [`Submission::set_state_after_training`] folds them into the
//! submission-level state.

use std::fmt;

use chrono::{DateTime, Utc};
use ramp_state::FoldIdentity;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::combine::combine_predictions;
use crate::domain::error::{RampError, Result};
use crate::domain::fold::FoldSpec;
use crate::domain::predictions::Predictions;
use crate::domain::score::ScoreType;
use crate::domain::state::{aggregate_fold_states, SubmissionState};

// ---------------------------------------------------------------------------
// SubmissionId
// ---------------------------------------------------------------------------

/// Stable submission id: `m` followed by the SHA-256 hex of team and name,
/// each prefixed by its byte length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    pub fn derive(team: &str, name: &str) -> Self {
        let mut hasher = Sha256::new();
        for field in [team, name] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(format!("m{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// FoldOutcome
// ---------------------------------------------------------------------------

/// Result of running one submission on one fold.
///
/// Plain data returned by a worker task; nothing in it refers back to the
/// submission it came from except the id and the fold index.
#[derive(Debug, Clone, Default)]
pub struct FoldOutcome {
    pub submission_id: Option<SubmissionId>,
    pub fold_index: usize,
    pub state: SubmissionState,
    pub error_msg: Option<String>,
    pub full_train_predictions: Option<Predictions>,
    pub test_predictions: Option<Predictions>,
    pub train_time: Option<f64>,
    pub valid_time: Option<f64>,
    pub test_time: Option<f64>,
    pub train_score: Option<f64>,
    pub valid_score: Option<f64>,
    pub test_score: Option<f64>,
}

impl FoldOutcome {
    /// An outcome that carries only an error state and its message.
    pub fn failed(
        submission_id: SubmissionId,
        fold_index: usize,
        state: SubmissionState,
        error_msg: String,
    ) -> Self {
        Self {
            submission_id: Some(submission_id),
            fold_index,
            state,
            error_msg: Some(error_msg),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// SubmissionOnFold
// ---------------------------------------------------------------------------

/// A submission's record on one fold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionOnFold {
    pub fold_index: usize,
    pub fold_id: FoldIdentity,
    #[serde(default)]
    pub state: SubmissionState,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub full_train_predictions: Option<Predictions>,
    #[serde(default)]
    pub test_predictions: Option<Predictions>,
    #[serde(default)]
    pub train_time: f64,
    #[serde(default)]
    pub valid_time: f64,
    #[serde(default)]
    pub test_time: f64,
    #[serde(default)]
    pub train_score: Option<f64>,
    #[serde(default)]
    pub valid_score: Option<f64>,
    #[serde(default)]
    pub test_score: Option<f64>,
    #[serde(default)]
    pub contributivity: f64,
    #[serde(default)]
    pub best: bool,
}

impl SubmissionOnFold {
    pub fn new(fold_index: usize, fold_id: FoldIdentity) -> Self {
        Self {
            fold_index,
            fold_id,
            state: SubmissionState::New,
            error_msg: String::new(),
            full_train_predictions: None,
            test_predictions: None,
            train_time: 0.0,
            valid_time: 0.0,
            test_time: 0.0,
            train_score: None,
            valid_score: None,
            test_score: None,
            contributivity: 0.0,
            best: false,
        }
    }

    /// Replace the record with `outcome`, keeping the fields its state makes
    /// meaningful.
    ///
    /// Results of any earlier run are dropped first. Error outcomes only
    /// bring their message. Otherwise the train time is taken from `trained`
    /// onward, validation outputs from `validated` onward, and test outputs
    /// only when `tested`.
    pub fn update(&mut self, outcome: FoldOutcome) {
        self.reset();
        self.state = outcome.state;
        if self.state.is_error() {
            self.error_msg = outcome.error_msg.unwrap_or_default();
            return;
        }
        if self.state.has_model() {
            self.train_time = outcome.train_time.unwrap_or_default();
        }
        if self.state.has_validation() {
            self.valid_time = outcome.valid_time.unwrap_or_default();
            self.full_train_predictions = outcome.full_train_predictions;
            self.train_score = outcome.train_score;
            self.valid_score = outcome.valid_score;
        }
        if self.state == SubmissionState::Tested {
            self.test_time = outcome.test_time.unwrap_or_default();
            self.test_predictions = outcome.test_predictions;
            self.test_score = outcome.test_score;
        }
    }

    /// Drop all results and put the fold in `state` with `error_msg`.
    pub fn set_error(&mut self, state: SubmissionState, error_msg: &str) {
        self.reset();
        self.state = state;
        self.error_msg = error_msg.to_string();
    }

    /// Forget every result; back to `new`.
    pub fn reset(&mut self) {
        *self = Self::new(self.fold_index, self.fold_id);
    }

    /// Validation predictions: the held-out rows of the full training-range
    /// predictions.
    pub fn valid_predictions(&self, fold: &FoldSpec) -> Result<Option<Predictions>> {
        self.full_train_predictions
            .as_ref()
            .map(|p| p.subset(fold.test_is()))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// A competing model and its results across all folds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub id: SubmissionId,
    pub team: String,
    pub name: String,
    #[serde(default)]
    pub state: SubmissionState,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default = "default_true")]
    pub is_valid: bool,
    #[serde(default = "default_true")]
    pub is_to_ensemble: bool,
    #[serde(default)]
    pub ignore: bool,
    pub on_folds: Vec<SubmissionOnFold>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub contributivity: f64,
    #[serde(default)]
    pub selection_count: usize,
    #[serde(default)]
    pub valid_score_cv_bag: Option<f64>,
    #[serde(default)]
    pub test_score_cv_bag: Option<f64>,
    #[serde(default)]
    pub valid_score_cv_bags: Option<Vec<f64>>,
    #[serde(default)]
    pub test_score_cv_bags: Option<Vec<f64>>,
}

impl Submission {
    /// New submission with one `new` record per fold.
    pub fn new(team: &str, name: &str, folds: &[FoldSpec]) -> Self {
        let on_folds = folds
            .iter()
            .enumerate()
            .map(|(i, f)| SubmissionOnFold::new(i, f.identity()))
            .collect();
        Self {
            id: SubmissionId::derive(team, name),
            team: team.to_string(),
            name: name.to_string(),
            state: SubmissionState::New,
            error_msg: String::new(),
            is_valid: true,
            is_to_ensemble: true,
            ignore: false,
            on_folds,
            submitted_at: Utc::now(),
            trained_at: None,
            contributivity: 0.0,
            selection_count: 0,
            valid_score_cv_bag: None,
            test_score_cv_bag: None,
            valid_score_cv_bags: None,
            test_score_cv_bags: None,
        }
    }

    /// `team/name`, for logs.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.team, self.name)
    }

    pub fn is_error(&self) -> bool {
        self.state.is_error()
    }

    /// Shown on the public leaderboard: valid with validation results.
    pub fn is_public_leaderboard(&self) -> bool {
        self.is_valid && self.state.has_validation()
    }

    /// Shown on the private leaderboard: valid and tested.
    pub fn is_private_leaderboard(&self) -> bool {
        self.is_valid && self.state == SubmissionState::Tested
    }

    /// Set the submission and every fold to `state`.
    pub fn set_state(&mut self, state: SubmissionState) {
        self.state = state;
        for fold in &mut self.on_folds {
            fold.state = state;
        }
    }

    /// Drop all results and put the submission and every fold in an error
    /// state with `error_msg`.
    pub fn set_error(&mut self, state: SubmissionState, error_msg: &str) {
        self.reset();
        self.state = state;
        self.error_msg = error_msg.to_string();
        for fold in &mut self.on_folds {
            fold.set_error(state, error_msg);
        }
    }

    /// Forget all results, keeping identity and flags.
    pub fn reset(&mut self) {
        self.state = SubmissionState::New;
        self.error_msg.clear();
        self.trained_at = None;
        self.contributivity = 0.0;
        self.selection_count = 0;
        self.valid_score_cv_bag = None;
        self.test_score_cv_bag = None;
        self.valid_score_cv_bags = None;
        self.test_score_cv_bags = None;
        for fold in &mut self.on_folds {
            fold.reset();
        }
    }

    /// Derive the submission state from its fold states.
    ///
    /// The error message is the one of the first fold in the winning error
    /// state, and is cleared on success. When no aggregation rule applies the
    /// state is left as is.
    pub fn set_state_after_training(&mut self) {
        let states: Vec<SubmissionState> = self.on_folds.iter().map(|f| f.state).collect();
        let Some(resolution) = aggregate_fold_states(&states) else {
            return;
        };
        self.state = resolution.state;
        match resolution.error_fold {
            Some(i) => self.error_msg = self.on_folds[i].error_msg.clone(),
            None => {
                self.error_msg.clear();
                self.trained_at = Some(Utc::now());
            }
        }
    }

    /// Progressive cross-validation bagging scores on the training range.
    ///
    /// Entry `i` scores the NaN-aware mean of the validation predictions of
    /// folds `0..=i`, each placed at its held-out rows, on the rows covered so
    /// far. The last entry becomes `valid_score_cv_bag`.
    pub fn compute_valid_score_cv_bags(
        &mut self,
        y_train: &Predictions,
        folds: &[FoldSpec],
        score_type: &dyn ScoreType,
    ) -> Result<()> {
        let bags = self.valid_cv_bags(y_train, folds, score_type)?;
        (self.valid_score_cv_bag, self.valid_score_cv_bags) = (bags.last, bags.bags);
        Ok(())
    }

    /// Progressive bagging scores of the fold test predictions.
    pub fn compute_test_score_cv_bags(
        &mut self,
        y_test: &Predictions,
        score_type: &dyn ScoreType,
    ) -> Result<()> {
        let bags = self.test_cv_bags(y_test, score_type)?;
        (self.test_score_cv_bag, self.test_score_cv_bags) = (bags.last, bags.bags);
        Ok(())
    }

    /// [`compute_valid_score_cv_bags`](Self::compute_valid_score_cv_bags)
    /// without touching the submission.
    pub fn valid_cv_bags(
        &self,
        y_train: &Predictions,
        folds: &[FoldSpec],
        score_type: &dyn ScoreType,
    ) -> Result<CvBags> {
        if !self.is_public_leaderboard() {
            return Ok(CvBags::worst(score_type));
        }
        let mut placed = Vec::with_capacity(self.on_folds.len());
        for on_fold in &self.on_folds {
            let fold = folds.get(on_fold.fold_index).ok_or_else(|| {
                RampError::InvalidFold(format!("unknown fold index {}", on_fold.fold_index))
            })?;
            let valid = on_fold.valid_predictions(fold)?.ok_or_else(|| {
                RampError::Predict(format!(
                    "{} has no validation predictions on fold {}",
                    self.full_name(),
                    on_fold.fold_index
                ))
            })?;
            let mut full = Predictions::empty(y_train.n_samples(), valid.n_columns());
            full.set_rows(fold.test_is(), &valid)?;
            placed.push(full);
        }
        CvBags::scored(y_train, &placed, score_type)
    }

    /// [`compute_test_score_cv_bags`](Self::compute_test_score_cv_bags)
    /// without touching the submission.
    pub fn test_cv_bags(&self, y_test: &Predictions, score_type: &dyn ScoreType) -> Result<CvBags> {
        if !self.is_private_leaderboard() {
            return Ok(CvBags::worst(score_type));
        }
        let mut predictions = Vec::with_capacity(self.on_folds.len());
        for on_fold in &self.on_folds {
            let test = on_fold.test_predictions.clone().ok_or_else(|| {
                RampError::Predict(format!(
                    "{} has no test predictions on fold {}",
                    self.full_name(),
                    on_fold.fold_index
                ))
            })?;
            predictions.push(test);
        }
        CvBags::scored(y_test, &predictions, score_type)
    }
}

/// Progressive bagging scores and the last of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CvBags {
    pub last: Option<f64>,
    pub bags: Option<Vec<f64>>,
}

impl CvBags {
    fn worst(score_type: &dyn ScoreType) -> Self {
        Self {
            last: Some(score_type.worst()),
            bags: None,
        }
    }

    fn scored(
        truth: &Predictions,
        predictions: &[Predictions],
        score_type: &dyn ScoreType,
    ) -> Result<Self> {
        let bags = score_cv_bags(truth, predictions, score_type)?;
        Ok(Self {
            last: bags.last().copied(),
            bags: Some(bags),
        })
    }
}

fn score_cv_bags(
    truth: &Predictions,
    predictions: &[Predictions],
    score_type: &dyn ScoreType,
) -> Result<Vec<f64>> {
    let mut bags = Vec::with_capacity(predictions.len());
    for i in 1..=predictions.len() {
        let combined = combine_predictions(&predictions[..i], None)?;
        let covered = combined.valid_indexes();
        bags.push(score_type.compute(truth, &combined, Some(covered.as_slice())));
    }
    Ok(bags)
}
