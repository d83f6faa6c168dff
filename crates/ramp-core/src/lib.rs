//! RAMP core library
//!
//! Trains competing submissions across cross-validation folds, contains
//! per-fold failures, and ranks the results on score and on contribution to
//! a calibrated greedy ensemble.
//!
//! ## Key Components
//!
//! - `FoldExecutor`: train → validate → test on one fold, with artifact caching
//! - `Scheduler`: bounded fold-parallel batches and state aggregation
//! - `combine_predictions` / `IsotonicCalibrator` / `greedy_select`: ensembling
//! - `Leaderboard`: scores, contributivity and combined test scores

pub mod calibration;
pub mod combine;
pub mod config;
pub mod domain;
pub mod ensemble;
pub mod executor;
pub mod leaderboard;
pub mod metrics;
pub mod obs;
pub mod provider;
pub mod scheduler;
pub mod telemetry;

pub use calibration::{calibrate, calibrate_test, stratified_halves, IsotonicCalibrator};
pub use combine::combine_predictions;
pub use config::{EnsembleConfig, LeaderboardSection, RampConfig, StoreConfig};
pub use domain::{
    aggregate_fold_states, truncate_error_message, Accuracy, CvBags, Dataset, Direction, FeatureRows,
    FoldOutcome, FoldSpec, GroundTruth, NegativeLogLikelihood, Predictions, ProviderError,
    RampError, Result, Rmse, Score, ScoreKind, ScoreType, Stage, StateResolution, Submission,
    SubmissionId, SubmissionOnFold, SubmissionState,
};
pub use ensemble::{greedy_select, EnsembleSelection};
pub use executor::{FoldExecutor, FoldTask};
pub use leaderboard::{
    execution_time_leaderboard, round_score, score_leaderboard, Leaderboard, LeaderboardConfig,
    ScoreRow, SortBy, TimeRow,
};
pub use provider::{ModelArtifact, ModelProvider, ProviderRegistry};
pub use scheduler::{BatchReport, Scheduler, SchedulerConfig};

pub use ramp_state::{
    ArtifactKey, ArtifactStore, FoldIdentity, FsArtifactStore, PredictionKind, StorageError,
    TimingKind,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
