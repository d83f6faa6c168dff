//! Domain models for RAMP.
//!
//! - `Predictions`: dense prediction / ground-truth matrices
//! - `FoldSpec`: one cross-validation split
//! - `Submission` / `SubmissionOnFold`: a model and its per-fold results
//! - `SubmissionState`: lifecycle states and the fold aggregation rule
//! - `ScoreType`: pluggable metrics

pub mod dataset;
pub mod error;
pub mod fold;
pub mod predictions;
pub mod score;
pub mod state;
pub mod submission;

pub use dataset::{Dataset, FeatureRows, GroundTruth};
pub use error::{
    truncate_error_message, ProviderError, RampError, Result, ERROR_MARKER, MAX_ERROR_MSG_LEN,
};
pub use fold::FoldSpec;
pub use predictions::Predictions;
pub use score::{
    Accuracy, Direction, NegativeLogLikelihood, Rmse, Score, ScoreKind, ScoreType,
};
pub use state::{aggregate_fold_states, Stage, StateResolution, SubmissionState};
pub use submission::{CvBags, FoldOutcome, Submission, SubmissionId, SubmissionOnFold};
