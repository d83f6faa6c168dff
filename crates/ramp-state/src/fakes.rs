//! In-memory fakes for storage traits, used by tests and ephemeral runs
//!
//! `MemoryArtifactStore` satisfies the [`ArtifactStore`] contract without any
//! filesystem, and adds fault injection hooks for exercising the executor's
//! cache-miss and persist-failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory artifact store backed by `HashMap`s.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    models: Mutex<HashMap<ArtifactKey, Vec<u8>>>,
    predictions: Mutex<HashMap<(ArtifactKey, PredictionKind), Vec<u8>>>,
    times: Mutex<HashMap<(ArtifactKey, TimingKind), f64>>,
    corrupted: Mutex<HashSet<ArtifactKey>>,
    reject_writes: AtomicBool,
    model_writes: AtomicU64,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next loads of this model fail with `Corrupt`, as if a write
    /// had been interrupted. Cleared by the next successful `store_model`.
    pub fn corrupt_model(&self, key: &ArtifactKey) {
        lock(&self.corrupted).insert(key.clone());
    }

    /// When set, every write fails with an io error.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Number of successful `store_model` calls.
    pub fn model_writes(&self) -> u64 {
        self.model_writes.load(Ordering::SeqCst)
    }

    /// Whether a model is stored under `key`.
    pub fn has_model(&self, key: &ArtifactKey) -> bool {
        lock(&self.models).contains_key(key)
    }

    fn check_writable(&self, key: &ArtifactKey) -> StorageResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "writes rejected for {key}"
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store_model(&self, key: &ArtifactKey, artifact: &[u8]) -> StorageResult<()> {
        self.check_writable(key)?;
        lock(&self.models).insert(key.clone(), artifact.to_vec());
        lock(&self.corrupted).remove(key);
        self.model_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_model(&self, key: &ArtifactKey) -> StorageResult<Vec<u8>> {
        if lock(&self.corrupted).contains(key) {
            return Err(StorageError::Corrupt {
                key: key.to_string(),
                reason: "injected corruption".to_string(),
            });
        }
        lock(&self.models)
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete_model(&self, key: &ArtifactKey) -> StorageResult<()> {
        lock(&self.models).remove(key);
        lock(&self.corrupted).remove(key);
        Ok(())
    }

    async fn store_predictions(
        &self,
        key: &ArtifactKey,
        kind: PredictionKind,
        payload: &[u8],
    ) -> StorageResult<()> {
        self.check_writable(key)?;
        lock(&self.predictions).insert((key.clone(), kind), payload.to_vec());
        Ok(())
    }

    async fn load_predictions(
        &self,
        key: &ArtifactKey,
        kind: PredictionKind,
    ) -> StorageResult<Vec<u8>> {
        lock(&self.predictions)
            .get(&(key.clone(), kind))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: format!("{key}/{}", kind.as_str()),
            })
    }

    async fn store_time(
        &self,
        key: &ArtifactKey,
        kind: TimingKind,
        seconds: f64,
    ) -> StorageResult<()> {
        self.check_writable(key)?;
        lock(&self.times).insert((key.clone(), kind), seconds);
        Ok(())
    }

    async fn load_time(&self, key: &ArtifactKey, kind: TimingKind) -> StorageResult<f64> {
        lock(&self.times)
            .get(&(key.clone(), kind))
            .copied()
            .ok_or_else(|| StorageError::NotFound {
                key: format!("{key}/{}", kind.as_str()),
            })
    }
}
