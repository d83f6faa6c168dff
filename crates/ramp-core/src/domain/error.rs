//! Domain-level error taxonomy for RAMP.

use ramp_state::StorageError;

/// Marker separating the useful tail of a provider error from the traceback
/// noise before it.
pub const ERROR_MARKER: &str = "--->";

/// Upper bound on stored fold error messages, in characters.
pub const MAX_ERROR_MSG_LEN: usize = 2000;

/// Errors returned by a [`ModelProvider`](crate::provider::ModelProvider).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("check failed: {0}")]
    Check(String),

    #[error("fit failed: {0}")]
    Fit(String),

    #[error("predict failed: {0}")]
    Predict(String),

    #[error("artifact rejected: {0}")]
    Artifact(String),
}

/// RAMP domain errors.
#[derive(Debug, thiserror::Error)]
pub enum RampError {
    #[error("training error: {0}")]
    Train(String),

    #[error("prediction error: {0}")]
    Predict(String),

    #[error("persist error: {0}")]
    Persist(#[from] StorageError),

    #[error("calibration error: {0}")]
    Calibration(String),

    #[error("invalid fold: {0}")]
    InvalidFold(String),

    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("cannot combine an empty prediction list")]
    EmptyCombination,

    #[error("no model provider registered for submission {0}")]
    ProviderMissing(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker task failed: {0}")]
    Join(String),
}

/// Result type for RAMP domain operations.
pub type Result<T> = std::result::Result<T, RampError>;

/// Shorten a captured error message before storing it on a fold.
///
/// Keeps only the text from the last [`ERROR_MARKER`] onward (when the marker
/// is not at the very start), then caps the length at [`MAX_ERROR_MSG_LEN`]
/// characters.
pub fn truncate_error_message(msg: &str) -> String {
    let tail = match msg.rfind(ERROR_MARKER) {
        Some(pos) if pos > 0 => &msg[pos..],
        _ => msg,
    };
    tail.chars().take(MAX_ERROR_MSG_LEN).collect()
}
