//! Score types and score ordering.
//!
//! Whether a larger value is better depends on the metric, so raw `f64`s are
//! wrapped into a [`Score`] whose ordering is "better is greater": `a > b`
//! always means `a` is strictly better than `b`.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::predictions::Predictions;

/// Which way a metric improves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// A metric value ordered by quality.
///
/// `NaN` ranks below every other value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    pub direction: Direction,
}

impl Score {
    pub fn new(value: f64, direction: Direction) -> Self {
        Self { value, direction }
    }

    fn quality(&self) -> f64 {
        if self.value.is_nan() {
            return f64::NEG_INFINITY;
        }
        match self.direction {
            Direction::HigherIsBetter => self.value,
            Direction::LowerIsBetter => -self.value,
        }
    }

    /// Strictly better than `other`.
    pub fn is_better_than(&self, other: &Score) -> bool {
        self > other
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.quality().total_cmp(&other.quality())
    }
}

/// A pluggable metric, chosen per competition.
pub trait ScoreType: Send + Sync {
    /// Short metric name (`"acc"`, `"nll"`, `"rmse"`).
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    /// The worst achievable value, given to submissions without results.
    fn worst(&self) -> f64;

    /// Number of decimal digits shown on leaderboards.
    fn precision(&self) -> usize {
        3
    }

    /// Raw metric value. `indices` restricts scoring to those rows; `None`
    /// scores every row.
    fn compute(&self, truth: &Predictions, predictions: &Predictions, indices: Option<&[usize]>)
        -> f64;

    /// Metric value wrapped for comparison.
    fn score(
        &self,
        truth: &Predictions,
        predictions: &Predictions,
        indices: Option<&[usize]>,
    ) -> Score {
        self.wrap(self.compute(truth, predictions, indices))
    }

    fn wrap(&self, value: f64) -> Score {
        Score::new(value, self.direction())
    }

    fn worst_score(&self) -> Score {
        self.wrap(self.worst())
    }
}

fn selected_rows(truth: &Predictions, indices: Option<&[usize]>) -> Vec<usize> {
    match indices {
        Some(idx) => idx.to_vec(),
        None => (0..truth.n_samples()).collect(),
    }
}

/// Fraction of rows whose predicted class matches the true class.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accuracy;

impl ScoreType for Accuracy {
    fn name(&self) -> &str {
        "acc"
    }

    fn direction(&self) -> Direction {
        Direction::HigherIsBetter
    }

    fn worst(&self) -> f64 {
        0.0
    }

    fn compute(
        &self,
        truth: &Predictions,
        predictions: &Predictions,
        indices: Option<&[usize]>,
    ) -> f64 {
        let rows = selected_rows(truth, indices);
        if rows.is_empty() {
            return self.worst();
        }
        let true_labels = truth.labels();
        let predicted = predictions.labels();
        let hits = rows
            .iter()
            .filter(|&&i| {
                matches!(
                    (true_labels.get(i), predicted.get(i)),
                    (Some(Some(t)), Some(Some(p))) if t == p
                )
            })
            .count();
        hits as f64 / rows.len() as f64
    }
}

/// Mean negative log of the probability given to the true class.
#[derive(Debug, Clone, Copy)]
pub struct NegativeLogLikelihood {
    pub eps: f64,
}

impl Default for NegativeLogLikelihood {
    fn default() -> Self {
        Self { eps: 1e-15 }
    }
}

impl ScoreType for NegativeLogLikelihood {
    fn name(&self) -> &str {
        "nll"
    }

    fn direction(&self) -> Direction {
        Direction::LowerIsBetter
    }

    fn worst(&self) -> f64 {
        f64::MAX
    }

    fn compute(
        &self,
        truth: &Predictions,
        predictions: &Predictions,
        indices: Option<&[usize]>,
    ) -> f64 {
        let rows = selected_rows(truth, indices);
        if rows.is_empty() {
            return self.worst();
        }
        let true_labels = truth.hard_labels();
        let mut total = 0.0;
        for &i in &rows {
            let p = match (true_labels.get(i), predictions.rows().get(i)) {
                (Some(&label), Some(row)) => row.get(label).copied().unwrap_or(f64::NAN),
                _ => f64::NAN,
            };
            let p = if p.is_nan() { self.eps } else { p };
            total -= p.clamp(self.eps, 1.0).ln();
        }
        total / rows.len() as f64
    }
}

/// Root mean squared error on the first column.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rmse;

impl ScoreType for Rmse {
    fn name(&self) -> &str {
        "rmse"
    }

    fn direction(&self) -> Direction {
        Direction::LowerIsBetter
    }

    fn worst(&self) -> f64 {
        f64::MAX
    }

    fn compute(
        &self,
        truth: &Predictions,
        predictions: &Predictions,
        indices: Option<&[usize]>,
    ) -> f64 {
        let rows = selected_rows(truth, indices);
        let mut sum = 0.0;
        let mut n = 0usize;
        for &i in &rows {
            let (Some(t), Some(p)) = (truth.rows().get(i), predictions.rows().get(i)) else {
                continue;
            };
            let (Some(&t), Some(&p)) = (t.first(), p.first()) else {
                continue;
            };
            if t.is_nan() || p.is_nan() {
                continue;
            }
            sum += (p - t) * (p - t);
            n += 1;
        }
        if n == 0 {
            return self.worst();
        }
        (sum / n as f64).sqrt()
    }
}

/// Score types selectable from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    #[default]
    Accuracy,
    NegativeLogLikelihood,
    Rmse,
}

impl ScoreKind {
    pub fn build(&self) -> Arc<dyn ScoreType> {
        match self {
            ScoreKind::Accuracy => Arc::new(Accuracy),
            ScoreKind::NegativeLogLikelihood => Arc::new(NegativeLogLikelihood::default()),
            ScoreKind::Rmse => Arc::new(Rmse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truth() -> Predictions {
        Predictions::from_labels(&[0, 1, 1, 0], 2).unwrap()
    }

    fn preds() -> Predictions {
        Predictions::new(vec![
            vec![0.9, 0.1],
            vec![0.3, 0.7],
            vec![0.6, 0.4],
            vec![0.8, 0.2],
        ])
        .unwrap()
    }

    #[test]
    fn test_score_order_higher_is_better() {
        let a = Score::new(0.9, Direction::HigherIsBetter);
        let b = Score::new(0.7, Direction::HigherIsBetter);
        assert!(a > b);
        assert!(a.is_better_than(&b));
        assert!(!a.is_better_than(&a));
    }

    #[test]
    fn test_score_order_lower_is_better() {
        let a = Score::new(0.2, Direction::LowerIsBetter);
        let b = Score::new(0.5, Direction::LowerIsBetter);
        assert!(a > b);
    }

    #[test]
    fn test_nan_is_worst() {
        let nan = Score::new(f64::NAN, Direction::LowerIsBetter);
        let bad = Score::new(f64::MAX, Direction::LowerIsBetter);
        assert!(bad > nan);
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(Accuracy.compute(&truth(), &preds(), None), 0.75);
        assert_eq!(Accuracy.compute(&truth(), &preds(), Some(&[2][..])), 0.0);
        assert_eq!(Accuracy.compute(&truth(), &preds(), Some(&[][..])), 0.0);
    }

    #[test]
    fn test_accuracy_counts_missing_rows_as_wrong() {
        let mut p = preds();
        p.set_rows(&[0], &Predictions::empty(1, 2)).unwrap();
        assert_eq!(Accuracy.compute(&truth(), &p, None), 0.5);
    }

    #[test]
    fn test_nll_perfect_is_near_zero() {
        let nll = NegativeLogLikelihood::default();
        assert!(nll.compute(&truth(), &truth(), None) < 1e-9);
        let worse = nll.compute(&truth(), &preds(), None);
        assert!(nll.score(&truth(), &truth(), None) > nll.wrap(worse));
    }

    #[test]
    fn test_rmse_skips_missing() {
        let t = Predictions::from_values(&[1.0, 2.0, 3.0]);
        let p = Predictions::from_values(&[1.0, f64::NAN, 5.0]);
        let v = Rmse.compute(&t, &p, None);
        assert!((v - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_score_kind_build() {
        assert_eq!(ScoreKind::Accuracy.build().name(), "acc");
        assert_eq!(
            ScoreKind::Rmse.build().direction(),
            Direction::LowerIsBetter
        );
        let kind: ScoreKind = serde_json::from_str("\"negative_log_likelihood\"").unwrap();
        assert_eq!(kind.build().name(), "nll");
    }
}
