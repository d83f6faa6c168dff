//! Stub model providers and dataset builders shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ramp_core::{Dataset, FoldSpec, ModelArtifact, ModelProvider, Predictions, ProviderError};

/// Predicts the first feature of every row, shifted by `offset`.
///
/// With the regression fixtures below the first feature is the target, so
/// `Echo { offset: 0.0 }` is an exact model.
pub struct Echo {
    pub offset: f64,
}

impl ModelProvider for Echo {
    fn fit(&self, _x: &[Vec<f64>], _y: &Predictions) -> Result<ModelArtifact, ProviderError> {
        ModelArtifact::from_json(&self.offset)
    }

    fn predict(&self, model: &ModelArtifact, x: &[Vec<f64>]) -> Result<Predictions, ProviderError> {
        let offset: f64 = model.to_json()?;
        let values: Vec<f64> = x.iter().map(|row| row[0] + offset).collect();
        Ok(Predictions::from_values(&values))
    }
}

/// Predicts the training mean of the first target column.
pub struct Mean;

impl ModelProvider for Mean {
    fn fit(&self, _x: &[Vec<f64>], y: &Predictions) -> Result<ModelArtifact, ProviderError> {
        let col = y.column(0);
        ModelArtifact::from_json(&(col.iter().sum::<f64>() / col.len() as f64))
    }

    fn predict(&self, model: &ModelArtifact, x: &[Vec<f64>]) -> Result<Predictions, ProviderError> {
        let mean: f64 = model.to_json()?;
        Ok(Predictions::from_values(&vec![mean; x.len()]))
    }
}

/// Two-class model reading the class off the first feature. `confidence`
/// is the probability put on that class; below 0.5 the model is inverted.
pub struct Classifier {
    pub confidence: f64,
}

impl ModelProvider for Classifier {
    fn fit(&self, _x: &[Vec<f64>], _y: &Predictions) -> Result<ModelArtifact, ProviderError> {
        ModelArtifact::from_json(&self.confidence)
    }

    fn predict(&self, model: &ModelArtifact, x: &[Vec<f64>]) -> Result<Predictions, ProviderError> {
        let p: f64 = model.to_json()?;
        let rows = x
            .iter()
            .map(|row| {
                if row[0] < 0.5 {
                    vec![p, 1.0 - p]
                } else {
                    vec![1.0 - p, p]
                }
            })
            .collect();
        Predictions::new(rows).map_err(|e| ProviderError::Predict(e.to_string()))
    }
}

/// Wraps a provider and fails `fit` when the training rows contain a row
/// whose first feature equals `poison`.
pub struct FailOnRow<P> {
    pub inner: P,
    pub poison: f64,
}

impl<P: ModelProvider> ModelProvider for FailOnRow<P> {
    fn fit(&self, x: &[Vec<f64>], y: &Predictions) -> Result<ModelArtifact, ProviderError> {
        if x.iter().any(|row| row[0] == self.poison) {
            return Err(ProviderError::Fit(format!(
                "Traceback\n--->ValueError: cannot fit row {}",
                self.poison
            )));
        }
        self.inner.fit(x, y)
    }

    fn predict(&self, model: &ModelArtifact, x: &[Vec<f64>]) -> Result<Predictions, ProviderError> {
        self.inner.predict(model, x)
    }
}

/// Wraps a provider and counts `fit` and `predict` calls.
pub struct Counting<P> {
    pub inner: P,
    pub fits: AtomicUsize,
    pub predicts: AtomicUsize,
}

impl<P> Counting<P> {
    pub fn new(inner: P) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fits: AtomicUsize::new(0),
            predicts: AtomicUsize::new(0),
        })
    }

    pub fn fits(&self) -> usize {
        self.fits.load(Ordering::SeqCst)
    }
}

impl<P: ModelProvider> ModelProvider for Counting<P> {
    fn fit(&self, x: &[Vec<f64>], y: &Predictions) -> Result<ModelArtifact, ProviderError> {
        self.fits.fetch_add(1, Ordering::SeqCst);
        self.inner.fit(x, y)
    }

    fn predict(&self, model: &ModelArtifact, x: &[Vec<f64>]) -> Result<Predictions, ProviderError> {
        self.predicts.fetch_add(1, Ordering::SeqCst);
        self.inner.predict(model, x)
    }
}

/// Sleeps inside `fit` and records the highest number of fits seen running
/// at the same time.
pub struct Slow<P> {
    pub inner: P,
    pub delay: Duration,
    pub running: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl<P: ModelProvider> ModelProvider for Slow<P> {
    fn fit(&self, x: &[Vec<f64>], y: &Predictions) -> Result<ModelArtifact, ProviderError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.inner.fit(x, y)
    }

    fn predict(&self, model: &ModelArtifact, x: &[Vec<f64>]) -> Result<Predictions, ProviderError> {
        self.inner.predict(model, x)
    }
}

/// Predicts a uniform distribution over `classes` columns, whatever the
/// targets look like.
pub struct Uniform {
    pub classes: usize,
}

impl ModelProvider for Uniform {
    fn fit(&self, _x: &[Vec<f64>], _y: &Predictions) -> Result<ModelArtifact, ProviderError> {
        ModelArtifact::from_json(&self.classes)
    }

    fn predict(&self, model: &ModelArtifact, x: &[Vec<f64>]) -> Result<Predictions, ProviderError> {
        let classes: usize = model.to_json()?;
        let p = 1.0 / classes as f64;
        Predictions::new(vec![vec![p; classes]; x.len()])
            .map_err(|e| ProviderError::Predict(e.to_string()))
    }
}

/// Refuses every submission at check time.
pub struct Rejected;

impl ModelProvider for Rejected {
    fn check(&self) -> Result<(), ProviderError> {
        Err(ProviderError::Check("missing fit method".to_string()))
    }

    fn fit(&self, _x: &[Vec<f64>], _y: &Predictions) -> Result<ModelArtifact, ProviderError> {
        unreachable!("checked providers never fit")
    }

    fn predict(&self, _m: &ModelArtifact, _x: &[Vec<f64>]) -> Result<Predictions, ProviderError> {
        unreachable!("checked providers never predict")
    }
}

/// Six training rows with targets 1..=6 (feature = target) and two test
/// rows, split into two complementary folds.
pub fn regression_dataset() -> Dataset {
    let y: Vec<f64> = (1..=6).map(f64::from).collect();
    let x_train = y.iter().map(|v| vec![*v]).collect();
    Dataset::new(
        x_train,
        Predictions::from_values(&y),
        vec![vec![10.0], vec![20.0]],
        Predictions::from_values(&[10.0, 20.0]),
    )
    .unwrap()
    .with_folds(regression_folds())
    .unwrap()
}

pub fn regression_folds() -> Vec<FoldSpec> {
    vec![
        FoldSpec::new(vec![0, 1, 2], vec![3, 4, 5]).unwrap(),
        FoldSpec::new(vec![3, 4, 5], vec![0, 1, 2]).unwrap(),
    ]
}

/// Eight alternating binary labels (feature = label) and four test rows,
/// split into two complementary folds with both classes on each side.
pub fn classification_dataset() -> Dataset {
    let labels: Vec<usize> = (0..8).map(|i| i % 2).collect();
    let x_train = labels.iter().map(|l| vec![*l as f64]).collect();
    let test_labels = [0, 1, 1, 0];
    let x_test = test_labels.iter().map(|l| vec![*l as f64]).collect();
    Dataset::new(
        x_train,
        Predictions::from_labels(&labels, 2).unwrap(),
        x_test,
        Predictions::from_labels(&test_labels, 2).unwrap(),
    )
    .unwrap()
    .with_folds(classification_folds())
    .unwrap()
}

pub fn classification_folds() -> Vec<FoldSpec> {
    vec![
        FoldSpec::new(vec![0, 1, 2, 3], vec![4, 5, 6, 7]).unwrap(),
        FoldSpec::new(vec![4, 5, 6, 7], vec![0, 1, 2, 3]).unwrap(),
    ]
}
