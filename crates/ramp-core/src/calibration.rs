//! Isotonic probability calibration.
//!
//! One non-decreasing step function per class column is fitted with
//! pool-adjacent-violators against the 0/1 class indicator. Calibrated rows
//! are renormalized to sum to one.
//!
//! [`calibrate`] performs two-fold self calibration so that no point is ever
//! mapped by a calibrator fitted on it; [`calibrate_test`] fits on the whole
//! validation set and maps unseen test predictions.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::domain::error::{RampError, Result};
use crate::domain::predictions::Predictions;

/// Calibration curve for a single class column.
#[derive(Debug, Clone, PartialEq)]
enum ClassCurve {
    /// The fitting data had no positive or no negative example.
    Constant(f64),
    /// Fitted values at increasing, distinct input thresholds.
    Isotonic { xs: Vec<f64>, ys: Vec<f64> },
}

impl ClassCurve {
    fn fit(x: &[f64], y: &[f64]) -> Self {
        let mut points: Vec<(f64, f64)> = x
            .iter()
            .zip(y)
            .filter(|(xi, _)| !xi.is_nan())
            .map(|(&xi, &yi)| (xi, yi))
            .collect();
        if points.is_empty() {
            return ClassCurve::Constant(0.0);
        }
        let positives = points.iter().filter(|(_, yi)| *yi > 0.5).count();
        if positives == 0 || positives == points.len() {
            return ClassCurve::Constant(positives as f64 / points.len() as f64);
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Equal inputs collapse into one weighted point.
        let mut xs: Vec<f64> = Vec::new();
        let mut blocks: Vec<(f64, f64)> = Vec::new(); // (mean, weight)
        for (xi, yi) in points {
            match (xs.last(), blocks.last_mut()) {
                (Some(&last), Some((mean, weight))) if last == xi => {
                    *mean = (*mean * *weight + yi) / (*weight + 1.0);
                    *weight += 1.0;
                }
                _ => {
                    xs.push(xi);
                    blocks.push((yi, 1.0));
                }
            }
        }

        // Pool adjacent violators; `pools` holds (mean, weight, run length).
        let mut pools: Vec<(f64, f64, usize)> = Vec::with_capacity(blocks.len());
        for (mean, weight) in blocks {
            pools.push((mean, weight, 1));
            while pools.len() >= 2 {
                let (m2, w2, n2) = pools[pools.len() - 1];
                let (m1, w1, n1) = pools[pools.len() - 2];
                if m1 <= m2 {
                    break;
                }
                pools.pop();
                if let Some(last) = pools.last_mut() {
                    *last = ((m1 * w1 + m2 * w2) / (w1 + w2), w1 + w2, n1 + n2);
                }
            }
        }
        let ys = pools
            .into_iter()
            .flat_map(|(mean, _, n)| std::iter::repeat(mean.clamp(0.0, 1.0)).take(n))
            .collect();
        ClassCurve::Isotonic { xs, ys }
    }

    fn predict(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        match self {
            ClassCurve::Constant(v) => *v,
            ClassCurve::Isotonic { xs, ys } => {
                let last = xs.len() - 1;
                let x = x.clamp(xs[0], xs[last]);
                match xs.binary_search_by(|v| v.total_cmp(&x)) {
                    Ok(i) => ys[i],
                    Err(i) => {
                        // xs[i - 1] < x < xs[i]; clamping guarantees 0 < i <= last.
                        let (x0, x1) = (xs[i - 1], xs[i]);
                        let (y0, y1) = (ys[i - 1], ys[i]);
                        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
                    }
                }
            }
        }
    }
}

/// Per-class isotonic calibration of probability matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct IsotonicCalibrator {
    curves: Vec<ClassCurve>,
}

impl IsotonicCalibrator {
    /// Fit one curve per column of `probas` against `labels`.
    pub fn fit(probas: &Predictions, labels: &[usize]) -> Result<Self> {
        if probas.n_samples() != labels.len() {
            return Err(RampError::ShapeMismatch {
                expected: format!("{} labels", probas.n_samples()),
                actual: format!("{} labels", labels.len()),
            });
        }
        if probas.n_columns() == 0 {
            return Err(RampError::Calibration(
                "cannot calibrate predictions without columns".to_string(),
            ));
        }
        let curves = (0..probas.n_columns())
            .map(|j| {
                let indicator: Vec<f64> = labels
                    .iter()
                    .map(|&l| if l == j { 1.0 } else { 0.0 })
                    .collect();
                let curve = ClassCurve::fit(&probas.column(j), &indicator);
                if let ClassCurve::Constant(prior) = curve {
                    debug!(class = j, prior, "degenerate class, using constant prior");
                }
                curve
            })
            .collect();
        Ok(Self { curves })
    }

    pub fn n_classes(&self) -> usize {
        self.curves.len()
    }

    /// Map `probas` through the fitted curves and renormalize each row.
    ///
    /// A row whose calibrated values sum to zero becomes uniform; a row that
    /// is entirely missing stays missing.
    pub fn predict(&self, probas: &Predictions) -> Result<Predictions> {
        if probas.n_columns() != self.curves.len() {
            return Err(RampError::ShapeMismatch {
                expected: format!("{} columns", self.curves.len()),
                actual: format!("{} columns", probas.n_columns()),
            });
        }
        let n_classes = self.curves.len() as f64;
        let rows = probas
            .rows()
            .iter()
            .map(|row| {
                let mapped: Vec<f64> = row
                    .iter()
                    .zip(&self.curves)
                    .map(|(&x, curve)| curve.predict(x))
                    .collect();
                if mapped.iter().all(|v| v.is_nan()) {
                    return mapped;
                }
                let sum: f64 = mapped.iter().filter(|v| !v.is_nan()).sum();
                if sum <= 0.0 {
                    return vec![1.0 / n_classes; mapped.len()];
                }
                mapped.into_iter().map(|v| v / sum).collect()
            })
            .collect();
        Predictions::new(rows)
    }
}

/// Seeded stratified split of `0..labels.len()` into two halves.
///
/// Each class is shuffled and dealt half to each side; odd leftovers
/// alternate between the sides so the halves stay balanced.
pub fn stratified_halves(labels: &[usize], seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_classes = labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (i, &l) in labels.iter().enumerate() {
        by_class[l].push(i);
    }
    let (mut a, mut b) = (Vec::new(), Vec::new());
    let mut extra_to_a = true;
    for mut members in by_class {
        members.shuffle(&mut rng);
        let mut half = members.len() / 2;
        if members.len() % 2 == 1 {
            if extra_to_a {
                half += 1;
            }
            extra_to_a = !extra_to_a;
        }
        a.extend_from_slice(&members[..half]);
        b.extend_from_slice(&members[half..]);
    }
    a.sort_unstable();
    b.sort_unstable();
    (a, b)
}

/// Two-fold self calibration of validation predictions.
///
/// Points are split into halves by [`stratified_halves`]; each half is mapped
/// by the calibrator fitted on the other half.
pub fn calibrate(probas: &Predictions, labels: &[usize], seed: u64) -> Result<Predictions> {
    if probas.n_samples() != labels.len() {
        return Err(RampError::ShapeMismatch {
            expected: format!("{} labels", probas.n_samples()),
            actual: format!("{} labels", labels.len()),
        });
    }
    let (half_a, half_b) = stratified_halves(labels, seed);
    let mut calibrated = Predictions::empty(probas.n_samples(), probas.n_columns());
    for (fit_is, apply_is) in [(&half_a, &half_b), (&half_b, &half_a)] {
        if apply_is.is_empty() {
            continue;
        }
        let fit_labels: Vec<usize> = fit_is.iter().map(|&i| labels[i]).collect();
        let calibrator = IsotonicCalibrator::fit(&probas.subset(fit_is)?, &fit_labels)?;
        let mapped = calibrator.predict(&probas.subset(apply_is)?)?;
        calibrated.set_rows(apply_is, &mapped)?;
    }
    Ok(calibrated)
}

/// Calibrate test predictions with a calibrator fitted on the validation set.
pub fn calibrate_test(
    valid_probas: &Predictions,
    valid_labels: &[usize],
    test_probas: &Predictions,
) -> Result<Predictions> {
    IsotonicCalibrator::fit(valid_probas, valid_labels)?.predict(test_probas)
}
