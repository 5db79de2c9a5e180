use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a pipeline run. Detector and OCR failures never surface
/// here; they only shrink the set of candidates.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load image {}: {source}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to write report: {0}")]
    Report(String),
}
