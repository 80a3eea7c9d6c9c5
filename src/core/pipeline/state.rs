//! Shared state for the duplex audio pipeline.
//!
//! The pipeline is the only writer; callers read immutable snapshots taken
//! under short lock holds, or receive them through change callbacks. Hot
//! flags (mic/playback activity) are atomics so the per-frame paths never
//! take a lock to read them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

/// Echo-cancellation health metrics.
///
/// Updated by the processing task after each microphone frame. Degraded
/// values are never raised as errors; callers inspect this snapshot to
/// judge cancellation quality.
#[derive(Debug, Clone, PartialEq)]
pub struct AecMetrics {
    /// Whether the canceller is currently processing with a reference signal.
    pub is_active: bool,
    /// Echo Return Loss Enhancement in dB. Higher is better; near zero means
    /// the filter is not removing echo.
    pub erle_db: f32,
    /// Whether simultaneous near-end and far-end speech was detected on the
    /// most recent frame. Adaptation is frozen while true.
    pub double_talk_detected: bool,
    /// Microphone frames processed since initialization.
    pub frames_processed: u64,
    /// Exponential moving average of per-frame processing time in
    /// microseconds.
    pub avg_frame_time_us: f32,
}

impl AecMetrics {
    /// Metrics for a canceller that has not yet processed a frame.
    pub fn idle() -> Self {
        Self {
            is_active: false,
            erle_db: 0.0,
            double_talk_detected: false,
            frames_processed: 0,
            avg_frame_time_us: 0.0,
        }
    }
}

/// Point-in-time snapshot of pipeline state delivered to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub initialized: bool,
    pub microphone_active: bool,
    pub playback_active: bool,
    /// None until the first frame has been measured.
    pub aec: Option<AecMetrics>,
    /// The VAD threshold in effect right now (playback-elevated or resting).
    pub vad_threshold: f32,
}

/// State owned by the pipeline and shared with its processing task.
pub(crate) struct PipelineShared {
    pub initialized: AtomicBool,
    pub microphone_active: AtomicBool,
    pub playback_active: AtomicBool,
    pub aec: RwLock<Option<AecMetrics>>,
    /// Instant playback last stopped, for the post-playback echo window.
    pub playback_stopped_at: RwLock<Option<Instant>>,
    /// Most recent playback-reference frame, kept for echo-likelihood
    /// scoring.
    pub last_playback_frame: RwLock<Vec<f32>>,
}

impl PipelineShared {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            microphone_active: AtomicBool::new(false),
            playback_active: AtomicBool::new(false),
            aec: RwLock::new(None),
            playback_stopped_at: RwLock::new(None),
            last_playback_frame: RwLock::new(Vec::new()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_playback_active(&self) -> bool {
        self.playback_active.load(Ordering::Acquire)
    }

    pub fn is_microphone_active(&self) -> bool {
        self.microphone_active.load(Ordering::Acquire)
    }

    pub fn store_aec(&self, metrics: AecMetrics) {
        *self.aec.write() = Some(metrics);
    }

    pub fn snapshot(&self, vad_threshold: f32) -> PipelineState {
        PipelineState {
            initialized: self.is_initialized(),
            microphone_active: self.is_microphone_active(),
            playback_active: self.is_playback_active(),
            aec: self.aec.read().clone(),
            vad_threshold,
        }
    }
}
