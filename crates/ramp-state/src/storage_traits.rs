//! Storage trait definitions for RAMP
//!
//! - `FoldIdentity`: content hash of a fold's training indices, the cache key
//! - `ArtifactKey`: (submission, fold identity) pair addressing every artifact
//! - `ArtifactStore`: persistence of trained models, predictions and timings
//!
//! The store is byte-oriented: encoding of models and predictions belongs to
//! the caller. In-memory fakes live in the `fakes` module, a filesystem
//! backend in `fs`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// FoldIdentity
// ---------------------------------------------------------------------------

/// SHA-256 digest of a fold's training index sequence.
///
/// Each index is hashed as a little-endian `u64`, so re-deriving the same
/// indices from a seeded resampling reproduces the identity bit for bit.
/// Order matters: `[1, 2]` and `[2, 1]` are different folds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FoldIdentity([u8; 32]);

impl FoldIdentity {
    /// Hash a training index sequence.
    pub fn from_indices(train_is: &[usize]) -> Self {
        let mut hasher = Sha256::new();
        for i in train_is {
            hasher.update((*i as u64).to_le_bytes());
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    /// Hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for FoldIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FoldIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FoldIdentity({})", self.short())
    }
}

impl FromStr for FoldIdentity {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| StorageError::InvalidIdentity(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(StorageError::InvalidIdentity(s.to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for FoldIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FoldIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Address of every artifact produced by one submission on one fold.
///
/// Keys of distinct (submission, fold) pairs never collide, which is what lets
/// fold workers write concurrently without locking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Stable submission identifier (path-safe).
    pub submission: String,
    /// Identity of the fold's training indices.
    pub fold: FoldIdentity,
}

impl ArtifactKey {
    pub fn new(submission: impl Into<String>, fold: FoldIdentity) -> Self {
        Self {
            submission: submission.into(),
            fold,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.submission, self.fold.short())
    }
}

/// Which prediction set an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    /// Predictions on the whole training range (train and validation rows).
    FullTrain,
    /// Predictions on the held-out test set.
    Test,
}

impl PredictionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionKind::FullTrain => "full_train",
            PredictionKind::Test => "test",
        }
    }
}

/// Which elapsed-time measurement an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingKind {
    Train,
    Valid,
    Test,
}

impl TimingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimingKind::Train => "train_time",
            TimingKind::Valid => "valid_time",
            TimingKind::Test => "test_time",
        }
    }
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Durable storage of fold artifacts keyed by [`ArtifactKey`].
///
/// Guarantees:
/// - Writes under distinct keys may run concurrently.
/// - A load returns exactly the bytes of the last completed store, or an
///   error. A partial write reads back as `NotFound` or `Corrupt`.
/// - Single-key writes need not be atomic across process crashes.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist a serialized trained model.
    async fn store_model(&self, key: &ArtifactKey, artifact: &[u8]) -> StorageResult<()>;

    /// Load a serialized trained model. `NotFound` if absent.
    async fn load_model(&self, key: &ArtifactKey) -> StorageResult<Vec<u8>>;

    /// Remove a stored model. No-op if absent.
    async fn delete_model(&self, key: &ArtifactKey) -> StorageResult<()>;

    /// Persist serialized predictions.
    async fn store_predictions(
        &self,
        key: &ArtifactKey,
        kind: PredictionKind,
        payload: &[u8],
    ) -> StorageResult<()>;

    /// Load serialized predictions. `NotFound` if absent.
    async fn load_predictions(
        &self,
        key: &ArtifactKey,
        kind: PredictionKind,
    ) -> StorageResult<Vec<u8>>;

    /// Persist an elapsed time in seconds.
    async fn store_time(&self, key: &ArtifactKey, kind: TimingKind, seconds: f64)
        -> StorageResult<()>;

    /// Load an elapsed time in seconds. `NotFound` if absent.
    async fn load_time(&self, key: &ArtifactKey, kind: TimingKind) -> StorageResult<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_deterministic() {
        let a = FoldIdentity::from_indices(&[0, 3, 5, 7]);
        let b = FoldIdentity::from_indices(&[0, 3, 5, 7]);
        assert_eq!(a, b);
    }

    #[test]
    fn identity_depends_on_order() {
        let a = FoldIdentity::from_indices(&[1, 2]);
        let b = FoldIdentity::from_indices(&[2, 1]);
        assert_ne!(a, b);
    }

    #[test]
    fn identity_hashes_le_u64_bytes() {
        let mut hasher = Sha256::new();
        hasher.update(7u64.to_le_bytes());
        hasher.update(300u64.to_le_bytes());
        let expected = hex::encode(hasher.finalize());
        assert_eq!(FoldIdentity::from_indices(&[7, 300]).to_hex(), expected);
    }

    #[test]
    fn identity_display_fromstr_roundtrip() {
        let id = FoldIdentity::from_indices(&[4, 2, 9]);
        let parsed: FoldIdentity = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 12);
    }

    #[test]
    fn identity_fromstr_rejects_bad_input() {
        assert!("zz".parse::<FoldIdentity>().is_err());
        assert!("abcd".parse::<FoldIdentity>().is_err());
    }

    #[test]
    fn identity_serializes_as_hex_string() {
        let id = FoldIdentity::from_indices(&[1]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: FoldIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn artifact_key_display_uses_short_identity() {
        let key = ArtifactKey::new("m42", FoldIdentity::from_indices(&[0, 1]));
        let shown = key.to_string();
        assert!(shown.starts_with("m42/"));
        assert_eq!(shown.len(), "m42/".len() + 12);
    }
}
