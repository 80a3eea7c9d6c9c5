//! Microphone capture collaborator seam.
//!
//! The platform owns device enumeration and permission prompting; the
//! pipeline only expresses what it wants (sample rate, processing hints) and
//! consumes raw frames. Implementations wrap whatever the host exposes: a
//! native capture API, a WebRTC track, or a stub in tests.

use tokio::sync::mpsc;

use super::config::{NoiseSuppressionLevel, PipelineConfig};

/// Capability hints passed to the capture backend when opening the
/// microphone.
///
/// These mirror the pipeline configuration so platform-level processing
/// (where available) lines up with the pipeline's own AEC stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub noise_suppression_level: NoiseSuppressionLevel,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channels: u16,
}

impl CaptureConstraints {
    /// Derive constraints from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            noise_suppression_level: config.noise_suppression_level,
            auto_gain_control: config.auto_gain_control,
            sample_rate: config.sample_rate,
            channels: 1,
        }
    }
}

/// Error types for capture operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    /// The user or platform denied microphone access. Retryable by the
    /// caller after prompting the user.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// No usable capture device was found.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The backend failed for another reason.
    #[error("backend error: {0}")]
    Backend(String),
}

/// An open microphone delivering raw (pre-AEC) audio frames.
///
/// Dropping the source releases the device; the frame channel closes when
/// the backend stops producing.
pub struct MicrophoneSource {
    /// Human-readable device label.
    pub label: String,
    /// Raw mono f32 frames at the requested sample rate.
    pub frames: mpsc::Receiver<Vec<f32>>,
}

/// Platform capture backend.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Open the microphone with the given capability hints.
    ///
    /// May suspend on a permission prompt or device acquisition; the
    /// pipeline imposes no timeout.
    async fn open(&self, constraints: &CaptureConstraints) -> Result<MicrophoneSource, CaptureError>;
}

/// In-process capture backend for tests and headless runs.
///
/// Frames pushed through [`StubCapture::sender`] appear on the opened
/// source. Construct with [`StubCapture::denying`] to simulate a permission
/// rejection.
pub struct StubCapture {
    deny: bool,
    frame_tx: parking_lot::Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    frame_rx: parking_lot::Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
}

impl StubCapture {
    /// Backend that grants access and delivers injected frames.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            deny: false,
            frame_tx: parking_lot::Mutex::new(Some(tx)),
            frame_rx: parking_lot::Mutex::new(Some(rx)),
        }
    }

    /// Backend that rejects every open with a permission error.
    pub fn denying() -> Self {
        Self {
            deny: true,
            frame_tx: parking_lot::Mutex::new(None),
            frame_rx: parking_lot::Mutex::new(None),
        }
    }

    /// Sender used to inject raw microphone frames.
    ///
    /// # Panics
    /// Panics if the backend was constructed with [`StubCapture::denying`].
    pub fn sender(&self) -> mpsc::Sender<Vec<f32>> {
        self.frame_tx
            .lock()
            .clone()
            .expect("denying stub has no frame channel")
    }
}

impl Default for StubCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CaptureBackend for StubCapture {
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MicrophoneSource, CaptureError> {
        if self.deny {
            return Err(CaptureError::PermissionDenied(
                "microphone access rejected".to_string(),
            ));
        }

        let rx = self
            .frame_rx
            .lock()
            .take()
            .ok_or_else(|| CaptureError::DeviceUnavailable("stub already opened".to_string()))?;

        Ok(MicrophoneSource {
            label: format!("stub-mic ({} Hz)", constraints.sample_rate),
            frames: rx,
        })
    }
}
