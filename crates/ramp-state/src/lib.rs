//! ramp-state: artifact persistence for RAMP fold runs
//!
//! Trained models, predictions and elapsed times are cached per
//! (submission, fold identity). A fold's identity is the SHA-256 of its
//! training indices, so the same cross-validation split always maps to the
//! same artifacts.
//!
//! ## Key Components
//!
//! - `FoldIdentity`: content hash of a fold's training index sequence
//! - `ArtifactStore`: async store contract used by the fold executor
//! - `FsArtifactStore`: checksummed filesystem backend
//! - `fakes::MemoryArtifactStore`: in-memory backend with fault injection, also
//!   the default store when no root directory is configured

mod error;
pub mod fakes;
pub mod fs;
pub mod storage_traits;

pub use error::StorageError;
pub use fs::FsArtifactStore;
pub use storage_traits::{
    ArtifactKey, ArtifactStore, FoldIdentity, PredictionKind, StorageResult, TimingKind,
};
