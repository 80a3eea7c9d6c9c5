//! Real-time audio processing task.
//!
//! All DSP state lives on a dedicated task owned by the pipeline. Callers
//! talk to it exclusively through [`ProcessorCommand`] messages; cleaned
//! frames flow out through a bounded channel, and metric snapshots land in
//! the shared state for lock-free reads from the orchestration side.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::SharedClock;

use super::aec::EchoCanceller;
use super::callbacks::AecStateCallback;
use super::config::PipelineConfig;
use super::dsp;
use super::errors::PipelineResult;
use super::state::{AecMetrics, PipelineShared};

/// Depth of the command channel. Sized for tens of frames per second with
/// headroom; `feed_playback_reference` drops rather than blocks when full.
pub(crate) const COMMAND_CHANNEL_DEPTH: usize = 256;

/// Depth of the cleaned-output channel.
const CLEAN_CHANNEL_DEPTH: usize = 64;

/// Metric refresh interval in frames when nothing else changes.
const METRICS_REFRESH_FRAMES: u64 = 50;

/// Smoothing for the per-frame processing-time average.
const FRAME_TIME_ALPHA: f32 = 0.9;

/// Smoothing for the AGC gain.
const AGC_GAIN_ALPHA: f32 = 0.9;

/// AGC gain correction is clamped to this many dB per direction.
const AGC_MAX_CORRECTION_DB: f32 = 12.0;

/// Frames quieter than this are left untouched by AGC.
const AGC_SILENCE_FLOOR_DBFS: f32 = -90.0;

/// Sampled logging interval for dropped clean frames.
const DROP_LOG_INTERVAL: u64 = 50;

/// Commands accepted by the processing task.
pub(crate) enum ProcessorCommand {
    /// A raw microphone frame to clean.
    Mic(Vec<f32>),
    /// A playback frame to use as the cancellation reference.
    PlaybackReference(Vec<f32>),
    /// Reconfigure the echo canceller without re-initialization.
    UpdateAec { enabled: bool, filter_length: usize },
    /// Reconfigure automatic gain control.
    UpdateAgc { enabled: bool, target_dbfs: f32 },
    /// Clear adaptive filter state.
    ResetAec,
    /// Stop the task.
    Shutdown,
}

/// Handle to a running processing task.
pub(crate) struct ProcessorHandle {
    pub commands: mpsc::Sender<ProcessorCommand>,
    pub join: JoinHandle<()>,
}

/// Build the DSP state and spawn the processing task.
///
/// Fails if the echo canceller cannot be constructed from the configured
/// filter length; that failure is fatal to initialization.
pub(crate) fn spawn_processor(
    config: &PipelineConfig,
    shared: Arc<PipelineShared>,
    aec_callbacks: Arc<RwLock<Vec<AecStateCallback>>>,
    clean_tx: mpsc::Sender<Vec<f32>>,
    clock: SharedClock,
) -> PipelineResult<ProcessorHandle> {
    let canceller = if config.echo_cancellation {
        EchoCanceller::new(config.filter_length())?
    } else {
        // Canceller is kept around so AEC can be enabled later via
        // update_config without rebuilding the task
        EchoCanceller::new(config.filter_length().max(1))?
    };

    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_DEPTH);

    let mut worker = Processor {
        canceller,
        aec_enabled: config.echo_cancellation,
        agc_enabled: config.auto_gain_control,
        agc_target_dbfs: config.agc_target_dbfs,
        agc_gain: 1.0,
        avg_frame_time_us: 0.0,
        frames_since_notify: 0,
        last_notified: None,
        dropped_clean_frames: 0,
        shared,
        aec_callbacks,
        clean_tx,
        clock,
    };

    let join = tokio::spawn(async move {
        worker.run(rx).await;
        debug!("audio processor task exited");
    });

    Ok(ProcessorHandle { commands: tx, join })
}

/// Open a cleaned-output channel pair with the standard depth.
pub(crate) fn clean_channel() -> (mpsc::Sender<Vec<f32>>, mpsc::Receiver<Vec<f32>>) {
    mpsc::channel(CLEAN_CHANNEL_DEPTH)
}

struct Processor {
    canceller: EchoCanceller,
    aec_enabled: bool,
    agc_enabled: bool,
    agc_target_dbfs: f32,
    agc_gain: f32,
    avg_frame_time_us: f32,
    frames_since_notify: u64,
    last_notified: Option<AecMetrics>,
    dropped_clean_frames: u64,
    shared: Arc<PipelineShared>,
    aec_callbacks: Arc<RwLock<Vec<AecStateCallback>>>,
    clean_tx: mpsc::Sender<Vec<f32>>,
    clock: SharedClock,
}

impl Processor {
    async fn run(&mut self, mut rx: mpsc::Receiver<ProcessorCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                ProcessorCommand::Mic(frame) => self.handle_mic_frame(frame),
                ProcessorCommand::PlaybackReference(frame) => {
                    if self.aec_enabled {
                        self.canceller.push_reference(&frame);
                    }
                }
                ProcessorCommand::UpdateAec {
                    enabled,
                    filter_length,
                } => self.update_aec(enabled, filter_length),
                ProcessorCommand::UpdateAgc {
                    enabled,
                    target_dbfs,
                } => {
                    self.agc_enabled = enabled;
                    self.agc_target_dbfs = target_dbfs;
                }
                ProcessorCommand::ResetAec => self.canceller.reset(),
                ProcessorCommand::Shutdown => break,
            }
        }
    }

    fn handle_mic_frame(&mut self, frame: Vec<f32>) {
        let started = self.clock.now();

        let mut clean = if self.aec_enabled {
            self.canceller.process(&frame)
        } else {
            frame
        };

        if self.agc_enabled {
            self.apply_agc(&mut clean);
        }

        let elapsed_us = self.clock.now().duration_since(started).as_micros() as f32;
        self.avg_frame_time_us = if self.avg_frame_time_us == 0.0 {
            elapsed_us
        } else {
            FRAME_TIME_ALPHA * self.avg_frame_time_us + (1.0 - FRAME_TIME_ALPHA) * elapsed_us
        };

        self.publish_metrics();

        match self.clean_tx.try_send(clean) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_clean_frames += 1;
                if self.dropped_clean_frames % DROP_LOG_INTERVAL == 1 {
                    warn!(
                        "clean-frame consumer lagging, {} frames dropped so far",
                        self.dropped_clean_frames
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn apply_agc(&mut self, frame: &mut [f32]) {
        if frame.is_empty() {
            return;
        }
        let level = dsp::dbfs(frame);
        if level <= AGC_SILENCE_FLOOR_DBFS {
            return;
        }

        let correction_db =
            (self.agc_target_dbfs - level).clamp(-AGC_MAX_CORRECTION_DB, AGC_MAX_CORRECTION_DB);
        let desired_gain = dsp::db_to_linear(correction_db);
        self.agc_gain = AGC_GAIN_ALPHA * self.agc_gain + (1.0 - AGC_GAIN_ALPHA) * desired_gain;

        for sample in frame.iter_mut() {
            *sample = (*sample * self.agc_gain).clamp(-1.0, 1.0);
        }
    }

    fn update_aec(&mut self, enabled: bool, filter_length: usize) {
        match EchoCanceller::new(filter_length.max(1)) {
            Ok(canceller) => {
                self.canceller = canceller;
                self.aec_enabled = enabled;
                debug!(
                    "AEC reconfigured: enabled={}, filter_length={}",
                    enabled, filter_length
                );
            }
            Err(e) => {
                // Audio must keep flowing; fall back to passthrough
                warn!("AEC reconfiguration failed, disabling cancellation: {e}");
                self.aec_enabled = false;
            }
        }
    }

    fn publish_metrics(&mut self) {
        let metrics = self.canceller.metrics(self.avg_frame_time_us);
        self.shared.store_aec(metrics.clone());
        self.frames_since_notify += 1;

        let changed = match &self.last_notified {
            None => true,
            Some(prev) => {
                prev.is_active != metrics.is_active
                    || prev.double_talk_detected != metrics.double_talk_detected
            }
        };

        if changed || self.frames_since_notify >= METRICS_REFRESH_FRAMES {
            self.frames_since_notify = 0;
            self.last_notified = Some(metrics.clone());

            let callbacks: Vec<AecStateCallback> = self.aec_callbacks.read().clone();
            for callback in callbacks {
                let snapshot = metrics.clone();
                tokio::spawn(async move {
                    callback(snapshot).await;
                });
            }
        }
    }
}
