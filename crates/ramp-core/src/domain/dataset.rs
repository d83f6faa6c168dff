//! Immutable training/test data shared by every fold task.

use serde::{Deserialize, Serialize};

use crate::domain::error::{RampError, Result};
use crate::domain::fold::FoldSpec;
use crate::domain::predictions::Predictions;

/// Feature rows handed to model providers.
pub type FeatureRows = Vec<Vec<f64>>;

/// Ground truth for the training range and, when known, the test set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroundTruth {
    pub y_train: Predictions,
    #[serde(default)]
    pub y_test: Option<Predictions>,
}

/// Features, ground truth and cross-validation folds for one competition.
///
/// Built once and shared behind an `Arc`; nothing mutates it after
/// construction.
#[derive(Debug, Clone)]
pub struct Dataset {
    x_train: FeatureRows,
    x_test: FeatureRows,
    truth: GroundTruth,
    folds: Vec<FoldSpec>,
}

impl Dataset {
    pub fn new(
        x_train: FeatureRows,
        y_train: Predictions,
        x_test: FeatureRows,
        y_test: Predictions,
    ) -> Result<Self> {
        if x_train.len() != y_train.n_samples() {
            return Err(RampError::ShapeMismatch {
                expected: format!("{} training targets", x_train.len()),
                actual: format!("{} training targets", y_train.n_samples()),
            });
        }
        if x_test.len() != y_test.n_samples() {
            return Err(RampError::ShapeMismatch {
                expected: format!("{} test targets", x_test.len()),
                actual: format!("{} test targets", y_test.n_samples()),
            });
        }
        Ok(Self {
            x_train,
            x_test,
            truth: GroundTruth {
                y_train,
                y_test: Some(y_test),
            },
            folds: Vec::new(),
        })
    }

    /// Attach the cross-validation folds. Every fold index must address a
    /// training row.
    pub fn with_folds(mut self, folds: Vec<FoldSpec>) -> Result<Self> {
        for (i, fold) in folds.iter().enumerate() {
            if let Some(max) = fold.max_index() {
                if max >= self.n_train() {
                    return Err(RampError::InvalidFold(format!(
                        "fold {i} references row {max} of {} training rows",
                        self.n_train()
                    )));
                }
            }
        }
        self.folds = folds;
        Ok(self)
    }

    pub fn folds(&self) -> &[FoldSpec] {
        &self.folds
    }

    pub fn n_train(&self) -> usize {
        self.x_train.len()
    }

    pub fn n_test(&self) -> usize {
        self.x_test.len()
    }

    pub fn x_train(&self) -> &[Vec<f64>] {
        &self.x_train
    }

    pub fn x_test(&self) -> &[Vec<f64>] {
        &self.x_test
    }

    pub fn y_train(&self) -> &Predictions {
        &self.truth.y_train
    }

    pub fn y_test(&self) -> Option<&Predictions> {
        self.truth.y_test.as_ref()
    }

    pub fn ground_truth(&self) -> &GroundTruth {
        &self.truth
    }

    /// Feature rows and targets at `indices` of the training range.
    pub fn train_subset(&self, indices: &[usize]) -> Result<(FeatureRows, Predictions)> {
        let mut rows = Vec::with_capacity(indices.len());
        for &i in indices {
            let row = self.x_train.get(i).ok_or_else(|| {
                RampError::InvalidFold(format!(
                    "index {i} out of range for {} training rows",
                    self.n_train()
                ))
            })?;
            rows.push(row.clone());
        }
        Ok((rows, self.truth.y_train.subset(indices)?))
    }
}
