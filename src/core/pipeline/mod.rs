//! Duplex audio pipeline: echo cancellation, echo-likelihood scoring, and
//! playback-aware voice-activity thresholds.
//!
//! The pipeline owns the microphone and playback-reference signal paths.
//! Callers feed it the assistant's played audio, read its adaptive VAD
//! threshold, and ask it whether a mic frame is probably echo before
//! confirming a barge-in.

mod aec;
pub mod callbacks;
pub mod capture;
pub mod config;
pub mod dsp;
pub mod errors;
mod manager;
mod processor;
pub mod state;

pub use callbacks::{AecStateCallback, StateChangeCallback};
pub use capture::{CaptureBackend, CaptureConstraints, CaptureError, MicrophoneSource, StubCapture};
pub use config::{NoiseSuppressionLevel, PipelineConfig, PipelineConfigUpdate};
pub use errors::{PipelineError, PipelineResult};
pub use manager::{CleanMicStream, DuplexPipeline};
pub use state::{AecMetrics, PipelineState};
