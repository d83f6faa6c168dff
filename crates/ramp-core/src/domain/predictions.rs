//! Prediction matrices.
//!
//! A [`Predictions`] value is a dense `n_samples × n_columns` matrix. For
//! classification each column holds the probability of one class, for
//! regression there is a single column. `NaN` marks a missing entry, which is
//! how full-training-range predictions carry only the rows a fold predicted.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::error::{RampError, Result};

/// Model output (or ground truth) for a set of data points.
///
/// Serializes as a bare row matrix; missing entries travel as `null` since
/// JSON has no NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    rows: Vec<Vec<f64>>,
    n_columns: usize,
}

impl Predictions {
    /// Build from row vectors. Every row must have the same length.
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_columns = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != n_columns) {
            return Err(RampError::ShapeMismatch {
                expected: format!("{n_columns} columns"),
                actual: format!("{} columns", bad.len()),
            });
        }
        Ok(Self { rows, n_columns })
    }

    /// All-missing matrix of the given shape.
    pub fn empty(n_samples: usize, n_columns: usize) -> Self {
        Self {
            rows: vec![vec![f64::NAN; n_columns]; n_samples],
            n_columns,
        }
    }

    /// One-hot encoding of class labels, used as classification ground truth.
    pub fn from_labels(labels: &[usize], n_classes: usize) -> Result<Self> {
        let mut rows = Vec::with_capacity(labels.len());
        for &label in labels {
            if label >= n_classes {
                return Err(RampError::ShapeMismatch {
                    expected: format!("label < {n_classes}"),
                    actual: format!("label {label}"),
                });
            }
            let mut row = vec![0.0; n_classes];
            row[label] = 1.0;
            rows.push(row);
        }
        Ok(Self {
            rows,
            n_columns: n_classes,
        })
    }

    /// Single-column matrix, used for regression targets and outputs.
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            rows: values.iter().map(|v| vec![*v]).collect(),
            n_columns: 1,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }

    pub fn n_columns(&self) -> usize {
        self.n_columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    /// The numeric view averaged by the combiner.
    pub fn combinable(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// `"rows x columns"`, for error messages.
    pub fn shape(&self) -> String {
        format!("{}x{}", self.n_samples(), self.n_columns)
    }

    /// Rows selected by `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let mut rows = Vec::with_capacity(indices.len());
        for &i in indices {
            let row = self.rows.get(i).ok_or_else(|| RampError::ShapeMismatch {
                expected: format!("index < {}", self.n_samples()),
                actual: format!("index {i}"),
            })?;
            rows.push(row.clone());
        }
        Ok(Self {
            rows,
            n_columns: self.n_columns,
        })
    }

    /// Overwrite the rows at `indices` with the rows of `other`, in order.
    pub fn set_rows(&mut self, indices: &[usize], other: &Predictions) -> Result<()> {
        if indices.len() != other.n_samples() || other.n_columns != self.n_columns {
            return Err(RampError::ShapeMismatch {
                expected: format!("{}x{}", indices.len(), self.n_columns),
                actual: other.shape(),
            });
        }
        let n_rows = self.rows.len();
        for (&i, row) in indices.iter().zip(other.rows.iter()) {
            let slot = self.rows.get_mut(i).ok_or_else(|| RampError::ShapeMismatch {
                expected: format!("index < {}", n_rows),
                actual: format!("index {i}"),
            })?;
            slot.clone_from(row);
        }
        Ok(())
    }

    /// Indices of rows without any missing entry.
    pub fn valid_indexes(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.iter().all(|v| !v.is_nan()))
            .map(|(i, _)| i)
            .collect()
    }

    /// Row-wise argmax (first maximum on ties); `None` for rows that are
    /// entirely missing.
    pub fn labels(&self) -> Vec<Option<usize>> {
        self.rows
            .iter()
            .map(|row| {
                let mut best: Option<(usize, f64)> = None;
                for (j, &v) in row.iter().enumerate() {
                    if v.is_nan() {
                        continue;
                    }
                    match best {
                        Some((_, b)) if v <= b => {}
                        _ => best = Some((j, v)),
                    }
                }
                best.map(|(j, _)| j)
            })
            .collect()
    }

    /// Class labels of a one-hot (or probability) matrix; missing rows map to
    /// class 0.
    pub fn hard_labels(&self) -> Vec<usize> {
        self.labels().into_iter().map(|l| l.unwrap_or(0)).collect()
    }

    /// Values of one column.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[j]).collect()
    }
}

impl Serialize for Predictions {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let rows: Vec<Vec<Option<f64>>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(|v| (!v.is_nan()).then_some(*v)).collect())
            .collect();
        rows.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Predictions {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let rows = Vec::<Vec<Option<f64>>>::deserialize(d)?
            .into_iter()
            .map(|r| r.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            .collect();
        Predictions::new(rows).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probas() -> Predictions {
        Predictions::new(vec![vec![0.2, 0.8], vec![0.6, 0.4], vec![0.5, 0.5]]).unwrap()
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let err = Predictions::new(vec![vec![0.1, 0.9], vec![1.0]]).unwrap_err();
        assert!(matches!(err, RampError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_labels_first_max_on_tie() {
        assert_eq!(probas().labels(), vec![Some(1), Some(0), Some(0)]);
    }

    #[test]
    fn test_labels_none_for_missing_row() {
        let p = Predictions::empty(2, 3);
        assert_eq!(p.labels(), vec![None, None]);
        assert_eq!(p.hard_labels(), vec![0, 0]);
    }

    #[test]
    fn test_from_labels_one_hot() {
        let truth = Predictions::from_labels(&[2, 0], 3).unwrap();
        assert_eq!(truth.row(0), &[0.0, 0.0, 1.0]);
        assert_eq!(truth.row(1), &[1.0, 0.0, 0.0]);
        assert!(Predictions::from_labels(&[3], 3).is_err());
    }

    #[test]
    fn test_subset_and_set_rows() {
        let p = probas();
        let sub = p.subset(&[2, 0]).unwrap();
        assert_eq!(sub.row(0), &[0.5, 0.5]);
        assert_eq!(sub.row(1), &[0.2, 0.8]);

        let mut full = Predictions::empty(4, 2);
        full.set_rows(&[1, 3], &p.subset(&[0, 1]).unwrap()).unwrap();
        assert_eq!(full.valid_indexes(), vec![1, 3]);
        assert_eq!(full.row(3), &[0.6, 0.4]);
    }

    #[test]
    fn test_subset_out_of_range() {
        assert!(probas().subset(&[7]).is_err());
    }

    #[test]
    fn test_serde_roundtrip_keeps_shape() {
        let p = probas();
        let json = serde_json::to_string(&p).unwrap();
        let back: Predictions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert_eq!(back.shape(), "3x2");
    }

    #[test]
    fn test_missing_entries_serialize_as_null() {
        let p = Predictions::empty(1, 2);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "[[null,null]]");
        let back: Predictions = serde_json::from_str(&json).unwrap();
        assert!(back.row(0).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        assert!(serde_json::from_str::<Predictions>("[[0.1, 0.9], [1.0]]").is_err());
    }
}
