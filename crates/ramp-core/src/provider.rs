//! Model provider contract.
//!
//! A provider wraps one submission's model code. The fold executor calls it
//! on blocking threads, so implementations are plain synchronous code and
//! may take as long as training takes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::domain::error::ProviderError;
use crate::domain::predictions::Predictions;
use crate::domain::submission::SubmissionId;

/// Serialized trained model, opaque to the orchestrator.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelArtifact(Vec<u8>);

impl ModelArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Encode any serde model as JSON.
    pub fn from_json<T: Serialize>(model: &T) -> Result<Self, ProviderError> {
        serde_json::to_vec(model)
            .map(Self)
            .map_err(|e| ProviderError::Artifact(e.to_string()))
    }

    /// Decode a model written by [`ModelArtifact::from_json`].
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T, ProviderError> {
        serde_json::from_slice(&self.0).map_err(|e| ProviderError::Artifact(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelArtifact({} bytes)", self.0.len())
    }
}

/// Trains and applies one submission's model.
pub trait ModelProvider: Send + Sync {
    /// Cheap sanity check before any fold is scheduled.
    fn check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Train on `x` / `y` and return the serialized model.
    fn fit(&self, x: &[Vec<f64>], y: &Predictions) -> Result<ModelArtifact, ProviderError>;

    /// Predict one row per row of `x`.
    fn predict(&self, model: &ModelArtifact, x: &[Vec<f64>])
        -> Result<Predictions, ProviderError>;

    /// Accept or reject a model loaded from the artifact store. A rejected
    /// model is retrained.
    fn restore(&self, model: &ModelArtifact) -> Result<(), ProviderError> {
        let _ = model;
        Ok(())
    }
}

/// Providers keyed by submission.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<SubmissionId, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: SubmissionId, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(id, provider);
    }

    pub fn get(&self, id: &SubmissionId) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.len())
            .finish()
    }
}
