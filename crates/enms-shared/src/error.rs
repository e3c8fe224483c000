//! Error types for the voice pipeline.
//!
//! Only faults live here. "No match", "low confidence", rejections and
//! clarifications are ordinary values and never become a `VoiceError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Inference timed out after {0}s")]
    InferenceTimeout(u64),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Roster error: {0}")]
    Roster(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VoiceError {
    pub fn code(&self) -> i32 {
        match self {
            VoiceError::InferenceTimeout(_) => -32010,
            VoiceError::Inference(_) => -32011,
            VoiceError::ModelNotLoaded(_) => -32012,
            VoiceError::MalformedOutput(_) => -32013,
            VoiceError::Roster(_) => -32020,
            VoiceError::Config(_) => -32030,
            VoiceError::Io(_) => -32006,
            VoiceError::Json(_) => -32700,
            VoiceError::Internal(_) => -32603,
        }
    }

    /// Inference faults end the current query as UNKNOWN; nothing else does.
    pub fn is_inference_failure(&self) -> bool {
        matches!(
            self,
            VoiceError::InferenceTimeout(_)
                | VoiceError::Inference(_)
                | VoiceError::ModelNotLoaded(_)
                | VoiceError::MalformedOutput(_)
        )
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;
