//! Submission lifecycle states and the fold → submission aggregation rule.

use std::fmt;

use ramp_state::TimingKind;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a submission, or of a submission on one fold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    #[default]
    New,
    Checked,
    CheckingError,
    Trained,
    TrainingError,
    Validated,
    ValidatingError,
    Tested,
    TestingError,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::New => "new",
            SubmissionState::Checked => "checked",
            SubmissionState::CheckingError => "checking_error",
            SubmissionState::Trained => "trained",
            SubmissionState::TrainingError => "training_error",
            SubmissionState::Validated => "validated",
            SubmissionState::ValidatingError => "validating_error",
            SubmissionState::Tested => "tested",
            SubmissionState::TestingError => "testing_error",
        }
    }

    /// Whether this is one of the `*_error` terminal states.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SubmissionState::CheckingError
                | SubmissionState::TrainingError
                | SubmissionState::ValidatingError
                | SubmissionState::TestingError
        )
    }

    /// Validation predictions exist (`validated` or `tested`).
    pub fn has_validation(&self) -> bool {
        matches!(self, SubmissionState::Validated | SubmissionState::Tested)
    }

    /// A trained model exists (`trained`, `validated` or `tested`).
    pub fn has_model(&self) -> bool {
        matches!(
            self,
            SubmissionState::Trained | SubmissionState::Validated | SubmissionState::Tested
        )
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage of the per-fold pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Train,
    Validate,
    Test,
}

impl Stage {
    /// State reached when the stage succeeds.
    pub fn done_state(&self) -> SubmissionState {
        match self {
            Stage::Train => SubmissionState::Trained,
            Stage::Validate => SubmissionState::Validated,
            Stage::Test => SubmissionState::Tested,
        }
    }

    /// State reached when the stage fails.
    pub fn error_state(&self) -> SubmissionState {
        match self {
            Stage::Train => SubmissionState::TrainingError,
            Stage::Validate => SubmissionState::ValidatingError,
            Stage::Test => SubmissionState::TestingError,
        }
    }

    pub fn timing_kind(&self) -> TimingKind {
        match self {
            Stage::Train => TimingKind::Train,
            Stage::Validate => TimingKind::Valid,
            Stage::Test => TimingKind::Test,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Train => "train",
            Stage::Validate => "validate",
            Stage::Test => "test",
        };
        f.write_str(s)
    }
}

/// Outcome of aggregating fold states into one submission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateResolution {
    pub state: SubmissionState,
    /// Position of the fold whose error message the submission surfaces.
    pub error_fold: Option<usize>,
}

/// Resolve a submission state from its fold states.
///
/// Rules, first match wins:
/// 1. all `tested` → `tested`
/// 2. all in {tested, validated} → `validated`
/// 3. all in {tested, validated, trained} → `trained`
/// 4. any `training_error` → `training_error` (first such fold)
/// 5. any `validating_error` → `validating_error`
/// 6. any `testing_error` → `testing_error`
///
/// Returns `None` when no rule applies (e.g. folds still `new`).
pub fn aggregate_fold_states(states: &[SubmissionState]) -> Option<StateResolution> {
    use SubmissionState::*;

    let all_in = |allowed: &[SubmissionState]| states.iter().all(|s| allowed.contains(s));
    let first = |target: SubmissionState| states.iter().position(|s| *s == target);

    if all_in(&[Tested]) {
        return Some(StateResolution {
            state: Tested,
            error_fold: None,
        });
    }
    if all_in(&[Tested, Validated]) {
        return Some(StateResolution {
            state: Validated,
            error_fold: None,
        });
    }
    if all_in(&[Tested, Validated, Trained]) {
        return Some(StateResolution {
            state: Trained,
            error_fold: None,
        });
    }
    for error in [TrainingError, ValidatingError, TestingError] {
        if let Some(i) = first(error) {
            return Some(StateResolution {
                state: error,
                error_fold: Some(i),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::SubmissionState::*;
    use super::*;

    #[test]
    fn test_all_tested() {
        let r = aggregate_fold_states(&[Tested, Tested]).unwrap();
        assert_eq!(r.state, Tested);
        assert_eq!(r.error_fold, None);
    }

    #[test]
    fn test_tested_and_validated_resolves_validated() {
        let r = aggregate_fold_states(&[Tested, Validated]).unwrap();
        assert_eq!(r.state, Validated);
    }

    #[test]
    fn test_mixed_success_resolves_trained() {
        let r = aggregate_fold_states(&[Trained, Validated, Tested]).unwrap();
        assert_eq!(r.state, Trained);
    }

    #[test]
    fn test_testing_error_points_at_failing_fold() {
        let r = aggregate_fold_states(&[Tested, TestingError]).unwrap();
        assert_eq!(r.state, TestingError);
        assert_eq!(r.error_fold, Some(1));
    }

    #[test]
    fn test_training_error_has_priority() {
        let r =
            aggregate_fold_states(&[TestingError, ValidatingError, TrainingError, TrainingError])
                .unwrap();
        assert_eq!(r.state, TrainingError);
        assert_eq!(r.error_fold, Some(2));
    }

    #[test]
    fn test_validating_error_over_testing_error() {
        let r = aggregate_fold_states(&[TestingError, ValidatingError]).unwrap();
        assert_eq!(r.state, ValidatingError);
        assert_eq!(r.error_fold, Some(1));
    }

    #[test]
    fn test_unresolved_states() {
        assert_eq!(aggregate_fold_states(&[New, Tested]), None);
        assert_eq!(aggregate_fold_states(&[CheckingError, Tested]), None);
    }

    #[test]
    fn test_state_serde_snake_case() {
        let json = serde_json::to_string(&ValidatingError).unwrap();
        assert_eq!(json, "\"validating_error\"");
        let back: SubmissionState = serde_json::from_str("\"checking_error\"").unwrap();
        assert_eq!(back, CheckingError);
    }

    #[test]
    fn test_stage_transitions() {
        assert_eq!(Stage::Train.done_state(), Trained);
        assert_eq!(Stage::Validate.error_state(), ValidatingError);
        assert_eq!(Stage::Test.timing_kind(), TimingKind::Test);
        assert!(Stage::Train < Stage::Test);
    }
}
