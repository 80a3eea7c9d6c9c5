//! Error types for the duplex audio pipeline.

use super::capture::CaptureError;

/// Error types for pipeline operations.
///
/// `Initialization` is fatal to the voice session and is never retried
/// internally. `PermissionDenied` and `Capture` are surfaced distinctly so
/// the caller can offer a retry. Echo-cancellation quality problems are not
/// errors; they are observable through [`super::AecMetrics`] only.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("pipeline is not initialized")]
    NotInitialized,
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture device error: {0}")]
    Capture(String),
}

impl From<CaptureError> for PipelineError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(msg) => PipelineError::PermissionDenied(msg),
            CaptureError::DeviceUnavailable(msg) | CaptureError::Backend(msg) => {
                PipelineError::Capture(msg)
            }
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
