//! Cross-validation folds.

use std::collections::HashSet;

use ramp_state::FoldIdentity;
use serde::{Deserialize, Serialize};

use crate::domain::error::{RampError, Result};

/// One cross-validation split: disjoint training and held-out index sets over
/// the training data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFold", into = "RawFold")]
pub struct FoldSpec {
    train_is: Vec<usize>,
    test_is: Vec<usize>,
    identity: FoldIdentity,
}

#[derive(Serialize, Deserialize)]
struct RawFold {
    train_is: Vec<usize>,
    test_is: Vec<usize>,
}

impl TryFrom<RawFold> for FoldSpec {
    type Error = RampError;

    fn try_from(raw: RawFold) -> Result<Self> {
        FoldSpec::new(raw.train_is, raw.test_is)
    }
}

impl From<FoldSpec> for RawFold {
    fn from(fold: FoldSpec) -> Self {
        RawFold {
            train_is: fold.train_is,
            test_is: fold.test_is,
        }
    }
}

impl FoldSpec {
    /// Validate and build a fold.
    ///
    /// Rejects duplicate indices inside either set and any index present in
    /// both sets.
    pub fn new(train_is: Vec<usize>, test_is: Vec<usize>) -> Result<Self> {
        let train: HashSet<usize> = train_is.iter().copied().collect();
        if train.len() != train_is.len() {
            return Err(RampError::InvalidFold(
                "duplicate index in training set".to_string(),
            ));
        }
        let mut test = HashSet::with_capacity(test_is.len());
        for &i in &test_is {
            if !test.insert(i) {
                return Err(RampError::InvalidFold(format!(
                    "duplicate index {i} in held-out set"
                )));
            }
            if train.contains(&i) {
                return Err(RampError::InvalidFold(format!(
                    "index {i} is in both training and held-out sets"
                )));
            }
        }
        let identity = FoldIdentity::from_indices(&train_is);
        Ok(Self {
            train_is,
            test_is,
            identity,
        })
    }

    pub fn train_is(&self) -> &[usize] {
        &self.train_is
    }

    pub fn test_is(&self) -> &[usize] {
        &self.test_is
    }

    /// Cache key of this fold, derived from the training indices only.
    pub fn identity(&self) -> FoldIdentity {
        self.identity
    }

    /// Largest index referenced by the fold, if any.
    pub fn max_index(&self) -> Option<usize> {
        self.train_is.iter().chain(&self.test_is).copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_fold() {
        let fold = FoldSpec::new(vec![0, 2, 4], vec![1, 3]).unwrap();
        assert_eq!(fold.train_is(), &[0, 2, 4]);
        assert_eq!(fold.test_is(), &[1, 3]);
        assert_eq!(fold.identity(), FoldIdentity::from_indices(&[0, 2, 4]));
        assert_eq!(fold.max_index(), Some(4));
    }

    #[test]
    fn test_rejects_overlap() {
        let err = FoldSpec::new(vec![0, 1], vec![1, 2]).unwrap_err();
        assert!(matches!(err, RampError::InvalidFold(_)));
    }

    #[test]
    fn test_rejects_duplicates() {
        assert!(FoldSpec::new(vec![0, 0], vec![1]).is_err());
        assert!(FoldSpec::new(vec![0], vec![1, 1]).is_err());
    }

    #[test]
    fn test_identity_ignores_held_out_set() {
        let a = FoldSpec::new(vec![0, 1], vec![2]).unwrap();
        let b = FoldSpec::new(vec![0, 1], vec![3]).unwrap();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: FoldSpec = serde_json::from_str(r#"{"train_is":[0,1],"test_is":[2]}"#).unwrap();
        assert_eq!(ok.test_is(), &[2]);
        let bad = serde_json::from_str::<FoldSpec>(r#"{"train_is":[0,1],"test_is":[1]}"#);
        assert!(bad.is_err());
    }
}
