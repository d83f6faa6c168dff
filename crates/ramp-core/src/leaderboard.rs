//! Leaderboards: mean fold scores, ensemble contributivity and timings.
//!
//! [`score_leaderboard`] ranks submissions by their mean validation score.
//! [`Leaderboard::build`] additionally runs calibrated greedy ensembling on
//! every fold, credits each submission with its share of the selected
//! ensembles, and scores the combined test predictions.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::calibration::{calibrate, calibrate_test};
use crate::combine::combine_predictions;
use crate::domain::dataset::GroundTruth;
use crate::domain::error::{RampError, Result};
use crate::domain::fold::FoldSpec;
use crate::domain::predictions::Predictions;
use crate::domain::score::ScoreType;
use crate::domain::state::SubmissionState;
use crate::domain::submission::{CvBags, Submission, SubmissionId, SubmissionOnFold};
use crate::ensemble::{greedy_select, EnsembleSelection};
use crate::obs;

/// Settings for [`Leaderboard::build`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardConfig {
    pub max_ensemble_size: usize,
    pub calibration_seed: u64,
    pub score_precision: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            max_ensemble_size: 80,
            calibration_seed: 57,
            score_precision: 3,
        }
    }
}

/// Row ordering of a leaderboard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Best mean validation score first
    #[default]
    Score,
    /// Largest ensemble share first, ties broken by score
    Contributivity,
}

impl FromStr for SortBy {
    type Err = RampError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "score" => Ok(SortBy::Score),
            "contributivity" => Ok(SortBy::Contributivity),
            other => Err(RampError::Config(format!("unknown sort order {other:?}"))),
        }
    }
}

/// One submission's leaderboard line.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoreRow {
    pub submission_id: SubmissionId,
    pub team: String,
    pub name: String,
    pub state: SubmissionState,
    pub train_score: f64,
    pub valid_score: f64,
    pub test_score: f64,
    pub train_time: f64,
    pub valid_time: f64,
    pub test_time: f64,
    pub contributivity: f64,
    pub selection_count: usize,
    pub valid_score_cv_bag: Option<f64>,
    pub test_score_cv_bag: Option<f64>,
}

/// Mean fold timings of one submission.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimeRow {
    pub submission_id: SubmissionId,
    pub team: String,
    pub name: String,
    pub train_time: f64,
    pub valid_time: f64,
    pub test_time: f64,
}

/// Round `value` to `precision` decimal digits. Values too large to scale
/// are returned unchanged.
pub fn round_score(value: f64, precision: usize) -> f64 {
    let factor = 10f64.powi(precision.min(15) as i32);
    let scaled = value * factor;
    if scaled.is_finite() {
        scaled.round() / factor
    } else {
        value
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn mean_score<'a>(
    submission: &'a Submission,
    pick: impl Fn(&'a SubmissionOnFold) -> Option<f64>,
) -> Option<f64> {
    mean(submission.on_folds.iter().filter_map(pick))
}

/// Rows ordered best-first by mean validation score.
///
/// Submissions not on the public leaderboard get the worst score everywhere;
/// test scores are only reported for submissions on the private leaderboard.
pub fn score_leaderboard(
    submissions: &[Submission],
    score_type: &dyn ScoreType,
    precision: usize,
) -> Vec<ScoreRow> {
    let worst = score_type.worst();
    let mut rows: Vec<ScoreRow> = submissions
        .iter()
        .map(|s| {
            let public = s.is_public_leaderboard();
            let (train_score, valid_score) = if public {
                (
                    mean_score(s, |f| f.train_score).unwrap_or(worst),
                    mean_score(s, |f| f.valid_score).unwrap_or(worst),
                )
            } else {
                (worst, worst)
            };
            let test_score = if s.is_private_leaderboard() {
                mean_score(s, |f| f.test_score).unwrap_or(worst)
            } else {
                worst
            };
            let times = time_row(s);
            ScoreRow {
                submission_id: s.id.clone(),
                team: s.team.clone(),
                name: s.name.clone(),
                state: s.state,
                train_score: round_score(train_score, precision),
                valid_score: round_score(valid_score, precision),
                test_score: round_score(test_score, precision),
                train_time: times.train_time,
                valid_time: times.valid_time,
                test_time: times.test_time,
                contributivity: s.contributivity,
                selection_count: s.selection_count,
                valid_score_cv_bag: s.valid_score_cv_bag.map(|v| round_score(v, precision)),
                test_score_cv_bag: s.test_score_cv_bag.map(|v| round_score(v, precision)),
            }
        })
        .collect();
    sort_rows(&mut rows, SortBy::Score, score_type);
    rows
}

fn time_row(s: &Submission) -> TimeRow {
    TimeRow {
        submission_id: s.id.clone(),
        team: s.team.clone(),
        name: s.name.clone(),
        train_time: mean(s.on_folds.iter().map(|f| f.train_time)).unwrap_or(0.0),
        valid_time: mean(s.on_folds.iter().map(|f| f.valid_time)).unwrap_or(0.0),
        test_time: mean(s.on_folds.iter().map(|f| f.test_time)).unwrap_or(0.0),
    }
}

/// Mean fold timings, in submission order.
pub fn execution_time_leaderboard(submissions: &[Submission]) -> Vec<TimeRow> {
    submissions.iter().map(time_row).collect()
}

fn sort_rows(rows: &mut [ScoreRow], by: SortBy, score_type: &dyn ScoreType) {
    let by_score = |a: &ScoreRow, b: &ScoreRow| {
        score_type
            .wrap(b.valid_score)
            .cmp(&score_type.wrap(a.valid_score))
    };
    match by {
        SortBy::Score => rows.sort_by(by_score),
        SortBy::Contributivity => rows.sort_by(|a, b| {
            b.contributivity
                .total_cmp(&a.contributivity)
                .then_with(|| by_score(a, b))
        }),
    }
}

/// Ensemble results of one fold, as computed on a worker thread.
struct FoldEnsemble {
    selection: EnsembleSelection,
    /// Submission position of each pool entry.
    members: Vec<usize>,
    combined_test: Option<Predictions>,
    best_test: Option<Predictions>,
}

/// Owned inputs of one fold's ensemble computation.
struct FoldJob {
    fold_index: usize,
    members: Vec<usize>,
    valid: Vec<Predictions>,
    tests: Vec<Option<Predictions>>,
    truth_valid: Predictions,
}

impl FoldJob {
    fn run(
        self,
        score_type: &dyn ScoreType,
        config: &LeaderboardConfig,
        with_test: bool,
    ) -> Result<FoldEnsemble> {
        let labels = self.truth_valid.hard_labels();
        let classification = self.truth_valid.n_columns() > 1;
        let pool: Vec<Predictions> = if classification {
            self.valid
                .iter()
                .map(|p| calibrate(p, &labels, config.calibration_seed))
                .collect::<Result<_>>()?
        } else {
            self.valid.clone()
        };

        let mut selection = greedy_select(
            &pool,
            &self.truth_valid,
            score_type,
            config.max_ensemble_size,
        )?;
        selection.fold_index = self.fold_index;

        let (mut combined_test, mut best_test) = (None, None);
        let selected: Option<Vec<&Predictions>> = selection
            .best_index_list
            .iter()
            .map(|&k| self.tests[k].as_ref())
            .collect();
        if let (true, Some(selected)) = (with_test, selected) {
            let mut tests = Vec::with_capacity(selected.len());
            for (&k, test) in selection.best_index_list.iter().zip(selected) {
                tests.push(if classification {
                    calibrate_test(&self.valid[k], &labels, test)?
                } else {
                    test.clone()
                });
            }
            combined_test = Some(combine_predictions(&tests, None)?);
            best_test = tests.into_iter().next();
        }

        Ok(FoldEnsemble {
            selection,
            members: self.members,
            combined_test,
            best_test,
        })
    }
}

/// A leaderboard with ensemble contributivity.
#[derive(Debug, Clone, Serialize)]
pub struct Leaderboard {
    pub rows: Vec<ScoreRow>,
    pub selections: Vec<EnsembleSelection>,
    /// Mean over folds of the best single-model validation score.
    pub best_valid_score: Option<f64>,
    /// Mean over folds of the ensemble validation score.
    pub combined_valid_score: Option<f64>,
    /// Score of the fold ensembles' test predictions, averaged across folds.
    pub combined_test_score: Option<f64>,
    /// Score of each fold's best model on test, averaged across folds.
    pub foldwise_best_test_score: Option<f64>,
}

impl Leaderboard {
    /// Build the full leaderboard and write contributivity, selection counts,
    /// per-fold `best` flags and CV-bag scores back onto `submissions`.
    ///
    /// Nothing is written unless the whole build succeeds.
    ///
    /// Only valid submissions with `is_to_ensemble` set and validation
    /// results enter the ensemble pool; the others keep their score line
    /// with zero contributivity.
    #[instrument(skip_all, fields(submissions = submissions.len(), folds = folds.len()))]
    pub async fn build(
        submissions: &mut [Submission],
        folds: &[FoldSpec],
        truth: &GroundTruth,
        score_type: Arc<dyn ScoreType>,
        config: &LeaderboardConfig,
    ) -> Result<Self> {
        let bags: Vec<(CvBags, Option<CvBags>)> = submissions
            .iter()
            .map(|s| cv_bags(s, folds, truth, score_type.as_ref()))
            .collect();

        let jobs = fold_jobs(submissions, folds, truth)?;
        let with_test = truth.y_test.is_some();
        let handles = jobs.into_iter().map(|job| {
            let score_type = Arc::clone(&score_type);
            let config = config.clone();
            tokio::task::spawn_blocking(move || job.run(score_type.as_ref(), &config, with_test))
        });
        let mut ensembles = Vec::new();
        for joined in futures::future::join_all(handles).await {
            let ensemble = joined.map_err(|e| RampError::Join(e.to_string()))??;
            obs::emit_ensemble_selected(
                ensemble.selection.fold_index,
                ensemble.selection.best_index_list.len(),
                ensemble.selection.combined_score.value,
            );
            ensembles.push(ensemble);
        }

        let best_valid_score = mean(ensembles.iter().map(|e| e.selection.best_single_score.value));
        let combined_valid_score = mean(ensembles.iter().map(|e| e.selection.combined_score.value));
        let (mut combined_test_score, mut foldwise_best_test_score) = (None, None);
        if let Some(y_test) = &truth.y_test {
            let combined: Vec<Predictions> =
                ensembles.iter().filter_map(|e| e.combined_test.clone()).collect();
            let best: Vec<Predictions> =
                ensembles.iter().filter_map(|e| e.best_test.clone()).collect();
            if !combined.is_empty() {
                let c = combine_predictions(&combined, None)?;
                combined_test_score = Some(score_type.compute(y_test, &c, None));
            }
            if !best.is_empty() {
                let b = combine_predictions(&best, None)?;
                foldwise_best_test_score = Some(score_type.compute(y_test, &b, None));
            }
        }

        // Every fold job has returned; only now are submissions written.
        for (s, (valid, test)) in submissions.iter_mut().zip(bags) {
            (s.valid_score_cv_bag, s.valid_score_cv_bags) = (valid.last, valid.bags);
            if let Some(test) = test {
                (s.test_score_cv_bag, s.test_score_cv_bags) = (test.last, test.bags);
            }
        }
        apply_contributivity(submissions, &ensembles);

        info!(
            best_valid_score = ?best_valid_score,
            combined_valid_score = ?combined_valid_score,
            combined_test_score = ?combined_test_score,
            foldwise_best_test_score = ?foldwise_best_test_score,
            "leaderboard built"
        );

        Ok(Self {
            rows: score_leaderboard(submissions, score_type.as_ref(), config.score_precision),
            selections: ensembles.into_iter().map(|e| e.selection).collect(),
            best_valid_score,
            combined_valid_score,
            combined_test_score,
            foldwise_best_test_score,
        })
    }

    /// Reorder rows; ties on contributivity fall back to score.
    pub fn sort_by(&mut self, by: SortBy, score_type: &dyn ScoreType) {
        sort_rows(&mut self.rows, by, score_type);
    }

    pub fn row(&self, id: &SubmissionId) -> Option<&ScoreRow> {
        self.rows.iter().find(|r| &r.submission_id == id)
    }
}

/// CV-bag scores of one submission; unavailable bags are logged and left
/// empty.
fn cv_bags(
    s: &Submission,
    folds: &[FoldSpec],
    truth: &GroundTruth,
    score_type: &dyn ScoreType,
) -> (CvBags, Option<CvBags>) {
    let valid = s
        .valid_cv_bags(&truth.y_train, folds, score_type)
        .unwrap_or_else(|e| {
            warn!(submission = %s.full_name(), error = %e, "valid cv-bag scores unavailable");
            CvBags::default()
        });
    let test = truth.y_test.as_ref().map(|y_test| {
        s.test_cv_bags(y_test, score_type).unwrap_or_else(|e| {
            warn!(submission = %s.full_name(), error = %e, "test cv-bag scores unavailable");
            CvBags::default()
        })
    });
    (valid, test)
}

fn fold_jobs(
    submissions: &[Submission],
    folds: &[FoldSpec],
    truth: &GroundTruth,
) -> Result<Vec<FoldJob>> {
    let pool: Vec<usize> = submissions
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_valid && s.is_to_ensemble && s.is_public_leaderboard())
        .map(|(i, _)| i)
        .collect();

    let mut jobs = Vec::new();
    for (fold_index, fold) in folds.iter().enumerate() {
        let mut job = FoldJob {
            fold_index,
            members: Vec::new(),
            valid: Vec::new(),
            tests: Vec::new(),
            truth_valid: truth.y_train.subset(fold.test_is())?,
        };
        for &i in &pool {
            let Some(on_fold) = submissions[i]
                .on_folds
                .iter()
                .find(|f| f.fold_index == fold_index)
            else {
                continue;
            };
            let Some(valid) = on_fold.valid_predictions(fold)? else {
                continue;
            };
            let test = on_fold.test_predictions.clone();
            let test_mismatch = match (&test, &truth.y_test) {
                (Some(t), Some(y)) => t.shape() != y.shape(),
                _ => false,
            };
            if valid.shape() != job.truth_valid.shape() || test_mismatch {
                warn!(
                    submission = %submissions[i].full_name(),
                    fold = fold_index,
                    "predictions do not match the targets, left out of the ensemble"
                );
                continue;
            }
            job.members.push(i);
            job.valid.push(valid);
            job.tests.push(test);
        }
        if !job.members.is_empty() {
            jobs.push(job);
        }
    }
    Ok(jobs)
}

/// Fold contributivity is the share of the fold ensemble a submission
/// fills; submission contributivity is its mean over folds.
fn apply_contributivity(submissions: &mut [Submission], ensembles: &[FoldEnsemble]) {
    for s in submissions.iter_mut() {
        s.contributivity = 0.0;
        s.selection_count = 0;
        for f in &mut s.on_folds {
            f.contributivity = 0.0;
            f.best = false;
        }
    }
    if ensembles.is_empty() {
        return;
    }
    let n_folds = ensembles.len() as f64;
    for e in ensembles {
        let list_len = e.selection.best_index_list.len() as f64;
        let best = e.selection.best_index_list.first().copied();
        for (k, &sub_idx) in e.members.iter().enumerate() {
            let occurrences = e.selection.occurrences(k);
            let submission = &mut submissions[sub_idx];
            submission.selection_count += occurrences;
            let share = occurrences as f64 / list_len;
            submission.contributivity += share / n_folds;
            if let Some(on_fold) = submission
                .on_folds
                .iter_mut()
                .find(|f| f.fold_index == e.selection.fold_index)
            {
                on_fold.contributivity = share;
                on_fold.best = best == Some(k);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::score::{Accuracy, Rmse};
    use crate::domain::submission::FoldOutcome;

    fn folds() -> Vec<FoldSpec> {
        vec![
            FoldSpec::new(vec![0, 1], vec![2, 3]).unwrap(),
            FoldSpec::new(vec![2, 3], vec![0, 1]).unwrap(),
        ]
    }

    fn tested(name: &str, full_train: &[f64], valid_score: f64) -> Submission {
        let mut s = Submission::new("team", name, &folds());
        for f in &mut s.on_folds {
            f.update(FoldOutcome {
                state: SubmissionState::Tested,
                full_train_predictions: Some(Predictions::from_values(full_train)),
                test_predictions: Some(Predictions::from_values(&[0.0])),
                train_time: Some(2.0),
                valid_time: Some(1.0),
                test_time: Some(0.5),
                train_score: Some(valid_score),
                valid_score: Some(valid_score),
                test_score: Some(valid_score),
                ..Default::default()
            });
        }
        s.set_state_after_training();
        s
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(0.123456, 3), 0.123);
        assert_eq!(round_score(f64::MAX, 3), f64::MAX);
    }

    #[test]
    fn test_score_leaderboard_orders_by_direction() {
        let subs = vec![
            tested("a", &[0.0; 4], 0.5),
            tested("b", &[0.0; 4], 0.1),
            tested("c", &[0.0; 4], 0.9),
        ];
        let rows = score_leaderboard(&subs, &Rmse, 3);
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        let rows = score_leaderboard(&subs, &Accuracy, 3);
        assert_eq!(rows[0].name, "c");
    }

    #[test]
    fn test_failed_submission_gets_worst_score() {
        let mut failed = tested("bad", &[0.0; 4], 0.99);
        failed.set_error(SubmissionState::TrainingError, "boom");
        let rows = score_leaderboard(&[tested("ok", &[0.0; 4], 0.5), failed], &Accuracy, 3);
        assert_eq!(rows[1].name, "bad");
        assert_eq!(rows[1].valid_score, 0.0);
        assert_eq!(rows[1].test_score, 0.0);
    }

    #[test]
    fn test_execution_times_are_fold_means() {
        let rows = execution_time_leaderboard(&[tested("a", &[0.0; 4], 0.5)]);
        assert_eq!(rows[0].train_time, 2.0);
        assert_eq!(rows[0].valid_time, 1.0);
        assert_eq!(rows[0].test_time, 0.5);
    }

    #[test]
    fn test_sort_by_parse() {
        assert_eq!("contributivity".parse::<SortBy>().unwrap(), SortBy::Contributivity);
        assert!("size".parse::<SortBy>().is_err());
    }

    #[tokio::test]
    async fn test_build_credits_exact_model() {
        let truth = GroundTruth {
            y_train: Predictions::from_values(&[1.0, 2.0, 3.0, 4.0]),
            y_test: Some(Predictions::from_values(&[0.0])),
        };
        let mut subs = vec![
            tested("flat", &[2.5; 4], 1.1),
            tested("exact", &[1.0, 2.0, 3.0, 4.0], 0.0),
        ];
        let mut not_ensembled = tested("hidden", &[1.0, 2.0, 3.0, 4.0], 0.0);
        not_ensembled.is_to_ensemble = false;
        subs.push(not_ensembled);

        let lb = Leaderboard::build(
            &mut subs,
            &folds(),
            &truth,
            Arc::new(Rmse),
            &LeaderboardConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(lb.selections.len(), 2);
        for sel in &lb.selections {
            assert_eq!(sel.best_index_list, vec![1]);
        }
        assert_eq!(subs[1].contributivity, 1.0);
        assert_eq!(subs[1].selection_count, 2);
        assert!(subs[1].on_folds.iter().all(|f| f.best));
        assert_eq!(subs[0].contributivity, 0.0);
        assert_eq!(subs[2].contributivity, 0.0);
        assert_eq!(lb.combined_valid_score, Some(0.0));
        assert_eq!(lb.combined_test_score, Some(0.0));
        assert!(subs[1].valid_score_cv_bag.is_some());
    }

    fn truth() -> GroundTruth {
        GroundTruth {
            y_train: Predictions::from_values(&[1.0, 2.0, 3.0, 4.0]),
            y_test: Some(Predictions::from_values(&[0.0])),
        }
    }

    #[tokio::test]
    async fn test_mismatched_predictions_left_out_of_pool() {
        let mut wide = tested("wide", &[0.0; 4], 0.0);
        for f in &mut wide.on_folds {
            f.full_train_predictions = Some(Predictions::new(vec![vec![1.0, 2.0]; 4]).unwrap());
        }
        let mut subs = vec![tested("exact", &[1.0, 2.0, 3.0, 4.0], 0.0), wide];

        let lb = Leaderboard::build(
            &mut subs,
            &folds(),
            &truth(),
            Arc::new(Rmse),
            &LeaderboardConfig::default(),
        )
        .await
        .unwrap();

        for sel in &lb.selections {
            assert_eq!(sel.best_index_list, vec![0]);
        }
        assert_eq!(subs[0].contributivity, 1.0);
        assert_eq!(subs[1].contributivity, 0.0);
        assert_eq!(lb.combined_valid_score, Some(0.0));
    }

    #[tokio::test]
    async fn test_failed_build_leaves_submissions_untouched() {
        let mut subs = vec![tested("exact", &[1.0, 2.0, 3.0, 4.0], 0.0)];
        subs[0].contributivity = 0.42;
        subs[0].selection_count = 3;
        subs[0].valid_score_cv_bag = Some(0.5);
        subs[0].on_folds[0].best = true;
        let before = subs.clone();

        // The second fold holds out a row the targets do not have.
        let folds = vec![
            FoldSpec::new(vec![0, 1], vec![2, 3]).unwrap(),
            FoldSpec::new(vec![2, 3], vec![0, 7]).unwrap(),
        ];
        let result = Leaderboard::build(
            &mut subs,
            &folds,
            &truth(),
            Arc::new(Rmse),
            &LeaderboardConfig::default(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(subs, before);
    }
}
