use std::path::PathBuf;

use thiserror::Error;

use crate::core::stim::StimKind;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("{extractor} does not accept {kind} stimuli")]
    UnsupportedStimulusType { extractor: String, kind: StimKind },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// External call or model failure; callers may retry at a higher layer.
    #[error("Extraction failed in {extractor}: {reason}")]
    ExtractionFailed { extractor: String, reason: String },
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Merge conflict: {0}")]
    MergeConflict(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("WAV format error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(String),
}

impl FeatureError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        FeatureError::InvalidArgument(msg.into())
    }

    pub fn extraction_failed(extractor: &str, reason: impl ToString) -> Self {
        FeatureError::ExtractionFailed {
            extractor: extractor.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether a batch runner may skip this item and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FeatureError::ExtractionFailed { .. })
    }
}
