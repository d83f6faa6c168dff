//! NaN-aware averaging of prediction matrices.

use crate::domain::error::{RampError, Result};
use crate::domain::predictions::Predictions;

/// Element-wise mean of the selected prediction matrices, ignoring `NaN`.
///
/// `index_list` picks entries of `predictions_list`; a repeated index weighs
/// that entry once per occurrence. `None` selects every entry. An element
/// missing from every selected matrix stays `NaN`.
pub fn combine_predictions(
    predictions_list: &[Predictions],
    index_list: Option<&[usize]>,
) -> Result<Predictions> {
    let selected: Vec<&Predictions> = match index_list {
        Some(indices) => indices
            .iter()
            .map(|&i| {
                predictions_list.get(i).ok_or_else(|| RampError::ShapeMismatch {
                    expected: format!("index < {}", predictions_list.len()),
                    actual: format!("index {i}"),
                })
            })
            .collect::<Result<_>>()?,
        None => predictions_list.iter().collect(),
    };
    let first = selected.first().ok_or(RampError::EmptyCombination)?;
    let (n_samples, n_columns) = (first.n_samples(), first.n_columns());
    if let Some(bad) = selected
        .iter()
        .find(|p| p.n_samples() != n_samples || p.n_columns() != n_columns)
    {
        return Err(RampError::ShapeMismatch {
            expected: first.shape(),
            actual: bad.shape(),
        });
    }

    let mut sums = vec![vec![0.0f64; n_columns]; n_samples];
    let mut counts = vec![vec![0u32; n_columns]; n_samples];
    for p in &selected {
        for (i, row) in p.combinable().iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if !v.is_nan() {
                    sums[i][j] += v;
                    counts[i][j] += 1;
                }
            }
        }
    }
    let rows = sums
        .into_iter()
        .zip(counts)
        .map(|(s, c)| {
            s.into_iter()
                .zip(c)
                .map(|(sum, n)| if n == 0 { f64::NAN } else { sum / f64::from(n) })
                .collect()
        })
        .collect();
    Predictions::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(rows: Vec<Vec<f64>>) -> Predictions {
        Predictions::new(rows).unwrap()
    }

    #[test]
    fn test_mean_of_two() {
        let a = p(vec![vec![0.2, 0.8], vec![1.0, 0.0]]);
        let b = p(vec![vec![0.4, 0.6], vec![0.0, 1.0]]);
        let c = combine_predictions(&[a, b], None).unwrap();
        assert!((c.row(0)[0] - 0.3).abs() < 1e-12);
        assert_eq!(c.row(1), &[0.5, 0.5]);
    }

    #[test]
    fn test_nan_ignored_and_all_nan_stays_nan() {
        let a = p(vec![vec![f64::NAN], vec![f64::NAN]]);
        let b = p(vec![vec![3.0], vec![f64::NAN]]);
        let c = combine_predictions(&[a, b], None).unwrap();
        assert_eq!(c.row(0), &[3.0]);
        assert!(c.row(1)[0].is_nan());
        assert_eq!(c.valid_indexes(), vec![0]);
    }

    #[test]
    fn test_duplicates_weigh_per_occurrence() {
        let a = Predictions::from_values(&[0.0]);
        let b = Predictions::from_values(&[3.0]);
        let c = combine_predictions(&[a, b], Some(&[1, 1, 0][..])).unwrap();
        assert_eq!(c.row(0), &[2.0]);
    }

    #[test]
    fn test_empty_selection() {
        let a = Predictions::from_values(&[1.0]);
        assert!(matches!(
            combine_predictions(&[a], Some(&[][..])),
            Err(RampError::EmptyCombination)
        ));
        assert!(matches!(
            combine_predictions(&[], None),
            Err(RampError::EmptyCombination)
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Predictions::from_values(&[1.0, 2.0]);
        let b = Predictions::from_values(&[1.0]);
        assert!(matches!(
            combine_predictions(&[a, b], None),
            Err(RampError::ShapeMismatch { .. })
        ));
    }
}
