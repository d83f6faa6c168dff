//! Greedy forward ensemble selection.
//!
//! Starting from the best single model, models are added one at a time (with
//! replacement) as long as adding one strictly improves the score of the
//! averaged predictions.

use serde::{Deserialize, Serialize};

use crate::combine::combine_predictions;
use crate::domain::error::{RampError, Result};
use crate::domain::predictions::Predictions;
use crate::domain::score::{Score, ScoreType};

/// Outcome of greedy selection on one fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleSelection {
    pub fold_index: usize,
    /// Selected model positions; a model may appear several times.
    pub best_index_list: Vec<usize>,
    pub best_single_score: Score,
    pub combined_score: Score,
    /// Number of models added after the initial one.
    pub rounds: usize,
}

impl EnsembleSelection {
    /// How many times `index` was selected.
    pub fn occurrences(&self, index: usize) -> usize {
        self.best_index_list.iter().filter(|&&i| i == index).count()
    }
}

/// Greedy selection over `predictions_list` scored against `truth`.
///
/// Each round tries appending every model and keeps the first candidate with
/// the strictly highest score. Selection stops when no candidate strictly
/// beats the current combination, or once `max_size` models are selected.
pub fn greedy_select(
    predictions_list: &[Predictions],
    truth: &Predictions,
    score_type: &dyn ScoreType,
    max_size: usize,
) -> Result<EnsembleSelection> {
    if predictions_list.is_empty() {
        return Err(RampError::EmptyCombination);
    }
    let max_size = max_size.max(1);

    let mut best_single: Option<(usize, Score)> = None;
    for (i, p) in predictions_list.iter().enumerate() {
        let s = score_type.score(truth, p, None);
        match best_single {
            Some((_, best)) if s <= best => {}
            _ => best_single = Some((i, s)),
        }
    }
    let (start, best_single_score) = best_single.ok_or(RampError::EmptyCombination)?;

    let mut best_index_list = vec![start];
    let mut current = best_single_score;
    while best_index_list.len() < max_size {
        let mut winner: Option<(usize, Score)> = None;
        let mut candidate = best_index_list.clone();
        candidate.push(0);
        for i in 0..predictions_list.len() {
            if let Some(last) = candidate.last_mut() {
                *last = i;
            }
            let combined = combine_predictions(predictions_list, Some(candidate.as_slice()))?;
            let s = score_type.score(truth, &combined, None);
            let bar = winner.map_or(current, |(_, w)| w);
            if s > bar {
                winner = Some((i, s));
            }
        }
        match winner {
            Some((i, s)) => {
                best_index_list.push(i);
                current = s;
            }
            None => break,
        }
    }

    Ok(EnsembleSelection {
        fold_index: 0,
        rounds: best_index_list.len() - 1,
        best_index_list,
        best_single_score,
        combined_score: current,
    })
}
