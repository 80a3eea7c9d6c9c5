//! Duplex audio pipeline orchestration.
//!
//! [`DuplexPipeline`] owns the microphone and playback-reference signal
//! paths. While the assistant speaks, the caller streams the played frames
//! into [`DuplexPipeline::feed_playback_reference`] and evaluates mic
//! frames against [`DuplexPipeline::current_vad_threshold`] and
//! [`DuplexPipeline::is_likely_echo`] before treating them as a genuine
//! interruption.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{MonotonicClock, SharedClock};

use super::callbacks::{AecStateCallback, StateChangeCallback};
use super::capture::{CaptureBackend, CaptureConstraints};
use super::config::{PipelineConfig, PipelineConfigUpdate};
use super::dsp;
use super::errors::{PipelineError, PipelineResult};
use super::processor::{self, ProcessorCommand};
use super::state::{PipelineShared, PipelineState};

/// Echo tail keeps ringing briefly after playback stops; VAD is suppressed
/// for this window.
const ECHO_SUPPRESSION_WINDOW: Duration = Duration::from_millis(200);

/// Mic frames correlating with the last playback frame above this are
/// treated as echo.
const ECHO_CORRELATION_THRESHOLD: f32 = 0.7;

/// Cleaned microphone audio, read by the downstream consumer.
///
/// The same stream handle is returned by every `start_microphone` call
/// within a session.
pub struct CleanMicStream {
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<f32>>>,
}

impl CleanMicStream {
    /// Receive the next cleaned frame, or `None` once the pipeline is
    /// destroyed.
    pub async fn next_frame(&self) -> Option<Vec<f32>> {
        self.rx.lock().await.recv().await
    }
}

/// The duplex voice interaction pipeline.
///
/// Lifecycle: `new` → `initialize` → any mix of microphone and playback
/// activity → `destroy`. All four combinations of mic/playback activity are
/// valid and independent. `destroy` is terminal and safe to repeat.
pub struct DuplexPipeline {
    config: RwLock<PipelineConfig>,
    capture: Arc<dyn CaptureBackend>,
    clock: SharedClock,
    shared: Arc<PipelineShared>,
    command_tx: RwLock<Option<mpsc::Sender<ProcessorCommand>>>,
    processor_join: Mutex<Option<JoinHandle<()>>>,
    clean_stream: RwLock<Option<Arc<CleanMicStream>>>,
    mic_forwarder: Mutex<Option<JoinHandle<()>>>,
    state_callbacks: RwLock<Vec<StateChangeCallback>>,
    aec_callbacks: Arc<RwLock<Vec<AecStateCallback>>>,
}

impl DuplexPipeline {
    /// Create a pipeline with the default monotonic clock.
    pub fn new(config: PipelineConfig, capture: Arc<dyn CaptureBackend>) -> Self {
        Self::with_clock(config, capture, Arc::new(MonotonicClock))
    }

    /// Create a pipeline with an injected clock.
    pub fn with_clock(
        config: PipelineConfig,
        capture: Arc<dyn CaptureBackend>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            capture,
            clock,
            shared: Arc::new(PipelineShared::new()),
            command_tx: RwLock::new(None),
            processor_join: Mutex::new(None),
            clean_stream: RwLock::new(None),
            mic_forwarder: Mutex::new(None),
            state_callbacks: RwLock::new(Vec::new()),
            aec_callbacks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Acquire the processing context and spawn the echo-cancellation task.
    ///
    /// Fatal to the session on failure; a second call is a no-op with a
    /// warning.
    pub async fn initialize(&self) -> PipelineResult<()> {
        if self.shared.is_initialized() {
            warn!("pipeline already initialized, ignoring");
            return Ok(());
        }

        let config = self.config.read().clone();
        let (clean_tx, clean_rx) = processor::clean_channel();
        let handle = processor::spawn_processor(
            &config,
            Arc::clone(&self.shared),
            Arc::clone(&self.aec_callbacks),
            clean_tx,
            Arc::clone(&self.clock),
        )?;

        *self.command_tx.write() = Some(handle.commands);
        *self.processor_join.lock() = Some(handle.join);
        *self.clean_stream.write() = Some(Arc::new(CleanMicStream {
            rx: tokio::sync::Mutex::new(clean_rx),
        }));
        self.shared.initialized.store(true, Ordering::Release);

        info!(
            "duplex pipeline initialized (aec={}, tail={}ms, {} Hz)",
            config.echo_cancellation, config.aec_tail_ms, config.sample_rate
        );
        self.notify_state_change();
        Ok(())
    }

    /// Open the microphone and route it through the echo canceller.
    ///
    /// Returns the cleaned-output stream. Idempotent: if the microphone is
    /// already running, the existing stream is returned.
    pub async fn start_microphone(&self) -> PipelineResult<Arc<CleanMicStream>> {
        if !self.shared.is_initialized() {
            return Err(PipelineError::NotInitialized);
        }

        if self.shared.is_microphone_active() {
            debug!("microphone already started");
            return self.stream_handle();
        }

        let constraints = CaptureConstraints::from_config(&self.config.read());
        let mut source = self.capture.open(&constraints).await?;
        info!("microphone started: {}", source.label);

        let commands = self
            .command_tx
            .read()
            .clone()
            .ok_or(PipelineError::NotInitialized)?;

        let forwarder = tokio::spawn(async move {
            while let Some(frame) = source.frames.recv().await {
                if commands.send(ProcessorCommand::Mic(frame)).await.is_err() {
                    break;
                }
            }
        });
        *self.mic_forwarder.lock() = Some(forwarder);

        self.shared.microphone_active.store(true, Ordering::Release);
        self.notify_state_change();
        self.stream_handle()
    }

    /// Release the microphone. Safe to call when not started.
    pub fn stop_microphone(&self) {
        if let Some(forwarder) = self.mic_forwarder.lock().take() {
            forwarder.abort();
        }

        if self.shared.microphone_active.swap(false, Ordering::AcqRel) {
            info!("microphone stopped");
            self.notify_state_change();
        }
    }

    /// Forward a frame of the assistant's outgoing audio as the echo
    /// reference.
    ///
    /// Non-blocking: posts a message to the processing task and updates
    /// in-process flags. Call once per played frame while the assistant is
    /// speaking.
    pub fn feed_playback_reference(&self, samples: &[f32]) {
        if !self.shared.is_initialized() {
            return;
        }

        *self.shared.last_playback_frame.write() = samples.to_vec();

        if let Some(commands) = self.command_tx.read().as_ref() {
            // Drop the frame rather than block the playback thread
            let _ = commands.try_send(ProcessorCommand::PlaybackReference(samples.to_vec()));
        }

        if !self.shared.playback_active.swap(true, Ordering::AcqRel) {
            *self.shared.playback_stopped_at.write() = None;
            debug!("playback reference active");
            self.notify_state_change();
        }
    }

    /// Mark assistant playback as stopped, starting the post-playback echo
    /// suppression window.
    pub fn stop_playback_reference(&self) {
        if self.shared.playback_active.swap(false, Ordering::AcqRel) {
            *self.shared.playback_stopped_at.write() = Some(self.clock.now());
            debug!("playback reference stopped");
            self.notify_state_change();
        }
    }

    /// VAD threshold in effect right now: elevated while assistant audio is
    /// playing, resting otherwise.
    pub fn current_vad_threshold(&self) -> f32 {
        let config = self.config.read();
        if self.shared.is_playback_active() {
            config.playback_vad_threshold
        } else {
            config.resting_vad_threshold
        }
    }

    /// Minimum sustained speech duration required to confirm speech right
    /// now.
    pub fn current_min_speech_duration(&self) -> Duration {
        let config = self.config.read();
        let ms = if self.shared.is_playback_active() {
            config.playback_min_speech_ms
        } else {
            config.resting_min_speech_ms
        };
        Duration::from_millis(ms)
    }

    /// True within the fixed window after playback stops while the echo
    /// tail rings out. Always false during playback itself, where the
    /// elevated threshold is the mechanism.
    pub fn should_suppress_vad(&self) -> bool {
        match *self.shared.playback_stopped_at.read() {
            Some(stopped_at) => {
                self.clock.now().duration_since(stopped_at) < ECHO_SUPPRESSION_WINDOW
            }
            None => false,
        }
    }

    /// Score a mic frame against the last playback frame.
    ///
    /// A second line of defense beyond the canceller: callers use this as a
    /// final guard before treating a frame as confirmed user speech.
    /// Returns false whenever playback is inactive.
    pub fn is_likely_echo(&self, mic_frame: &[f32]) -> bool {
        if mic_frame.is_empty() || !self.shared.is_playback_active() {
            return false;
        }

        let last_playback = self.shared.last_playback_frame.read();
        if last_playback.is_empty() {
            return false;
        }

        dsp::normalized_cross_correlation(mic_frame, &last_playback) > ECHO_CORRELATION_THRESHOLD
    }

    /// Snapshot of the pipeline state.
    pub fn state(&self) -> PipelineState {
        self.shared.snapshot(self.current_vad_threshold())
    }

    /// Register a callback for lifecycle and activity changes.
    pub fn on_state_change(&self, callback: StateChangeCallback) {
        self.state_callbacks.write().push(callback);
    }

    /// Register a callback for echo-cancellation metric changes.
    pub fn on_aec_state_change(&self, callback: AecStateCallback) {
        self.aec_callbacks.write().push(callback);
    }

    /// Merge a partial configuration into the live config and forward
    /// AEC/AGC-relevant fields to the processing task. Does not require
    /// re-initialization.
    pub fn update_config(&self, update: PipelineConfigUpdate) {
        let (aec_update, agc_update) = {
            let mut config = self.config.write();
            config.apply_update(&update);

            let aec_update = update.touches_aec().then(|| ProcessorCommand::UpdateAec {
                enabled: config.echo_cancellation,
                filter_length: config.filter_length(),
            });
            let agc_update = (update.auto_gain_control.is_some()
                || update.agc_target_dbfs.is_some())
            .then(|| ProcessorCommand::UpdateAgc {
                enabled: config.auto_gain_control,
                target_dbfs: config.agc_target_dbfs,
            });
            (aec_update, agc_update)
        };

        if let Some(commands) = self.command_tx.read().as_ref() {
            if let Some(command) = aec_update {
                let _ = commands.try_send(command);
            }
            if let Some(command) = agc_update {
                let _ = commands.try_send(command);
            }
        }
    }

    /// Clear adaptive filter state, e.g. after a reconnect or a long
    /// silence where echo characteristics may have drifted.
    pub fn reset_aec(&self) {
        if let Some(commands) = self.command_tx.read().as_ref() {
            let _ = commands.try_send(ProcessorCommand::ResetAec);
        }
    }

    /// Tear down the microphone, the processing task, and all state. Safe
    /// to call multiple times; the pipeline cannot be reused afterwards.
    pub async fn destroy(&self) {
        self.stop_microphone();

        let commands = self.command_tx.write().take();
        if let Some(commands) = commands {
            let _ = commands.send(ProcessorCommand::Shutdown).await;
        }

        let join = { self.processor_join.lock().take() };
        if let Some(join) = join {
            let _ = join.await;
        }

        let was_initialized = self.shared.initialized.swap(false, Ordering::AcqRel);
        self.shared.playback_active.store(false, Ordering::Release);
        *self.shared.aec.write() = None;
        *self.shared.playback_stopped_at.write() = None;
        self.shared.last_playback_frame.write().clear();
        *self.clean_stream.write() = None;

        if was_initialized {
            info!("duplex pipeline destroyed");
            self.notify_state_change();
        }
    }

    fn stream_handle(&self) -> PipelineResult<Arc<CleanMicStream>> {
        self.clean_stream
            .read()
            .clone()
            .ok_or(PipelineError::NotInitialized)
    }

    fn notify_state_change(&self) {
        let callbacks: Vec<StateChangeCallback> = self.state_callbacks.read().clone();
        if callbacks.is_empty() {
            return;
        }

        let snapshot = self.state();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            for callback in callbacks {
                let snapshot = snapshot.clone();
                handle.spawn(async move {
                    callback(snapshot).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::core::pipeline::capture::StubCapture;
    use std::sync::atomic::AtomicUsize;

    fn pipeline_with_stub() -> (DuplexPipeline, Arc<ManualClock>, mpsc::Sender<Vec<f32>>) {
        let clock = Arc::new(ManualClock::new());
        let capture = StubCapture::new();
        let mic_tx = capture.sender();
        let pipeline = DuplexPipeline::with_clock(
            PipelineConfig::default(),
            Arc::new(capture),
            Arc::clone(&clock) as SharedClock,
        );
        (pipeline, clock, mic_tx)
    }

    #[tokio::test]
    async fn test_start_microphone_requires_initialize() {
        let (pipeline, _, _) = pipeline_with_stub();
        let result = pipeline.start_microphone().await;
        assert!(matches!(result, Err(PipelineError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (pipeline, _, _) = pipeline_with_stub();
        pipeline.initialize().await.unwrap();
        pipeline.initialize().await.unwrap();
        assert!(pipeline.state().initialized);
        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_mic_frames_emerge_cleaned() {
        let (pipeline, _, mic_tx) = pipeline_with_stub();
        pipeline.initialize().await.unwrap();
        let stream = pipeline.start_microphone().await.unwrap();

        mic_tx.send(vec![0.2; 64]).await.unwrap();
        let frame = stream.next_frame().await.unwrap();
        assert_eq!(frame.len(), 64);

        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_start_microphone_idempotent() {
        let (pipeline, _, _) = pipeline_with_stub();
        pipeline.initialize().await.unwrap();

        let first = pipeline.start_microphone().await.unwrap();
        let second = pipeline.start_microphone().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_permission_denied_surfaces_distinctly() {
        let pipeline = DuplexPipeline::new(
            PipelineConfig::default(),
            Arc::new(StubCapture::denying()),
        );
        pipeline.initialize().await.unwrap();

        let result = pipeline.start_microphone().await;
        assert!(matches!(result, Err(PipelineError::PermissionDenied(_))));

        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_vad_threshold_elevated_during_playback() {
        let (pipeline, _, _) = pipeline_with_stub();
        pipeline.initialize().await.unwrap();

        assert_eq!(pipeline.current_vad_threshold(), 0.5);
        assert_eq!(
            pipeline.current_min_speech_duration(),
            Duration::from_millis(150)
        );

        pipeline.feed_playback_reference(&[0.1; 64]);
        assert_eq!(pipeline.current_vad_threshold(), 0.7);
        assert_eq!(
            pipeline.current_min_speech_duration(),
            Duration::from_millis(200)
        );

        pipeline.stop_playback_reference();
        assert_eq!(pipeline.current_vad_threshold(), 0.5);

        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_suppression_window_after_playback_stops() {
        let (pipeline, clock, _) = pipeline_with_stub();
        pipeline.initialize().await.unwrap();

        // Never suppressed before playback, nor during it
        assert!(!pipeline.should_suppress_vad());
        pipeline.feed_playback_reference(&[0.1; 64]);
        assert!(!pipeline.should_suppress_vad());

        pipeline.stop_playback_reference();
        assert!(pipeline.should_suppress_vad());

        clock.advance_ms(150);
        assert!(pipeline.should_suppress_vad());

        clock.advance_ms(60);
        assert!(!pipeline.should_suppress_vad());

        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_suppression_cleared_when_playback_resumes() {
        let (pipeline, _, _) = pipeline_with_stub();
        pipeline.initialize().await.unwrap();

        pipeline.feed_playback_reference(&[0.1; 64]);
        pipeline.stop_playback_reference();
        assert!(pipeline.should_suppress_vad());

        pipeline.feed_playback_reference(&[0.1; 64]);
        assert!(!pipeline.should_suppress_vad());

        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_is_likely_echo_requires_active_playback() {
        let (pipeline, _, _) = pipeline_with_stub();
        pipeline.initialize().await.unwrap();

        let frame: Vec<f32> = (0..128)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 16.0).sin())
            .collect();

        // Perfect correlation, but playback inactive
        pipeline.feed_playback_reference(&frame);
        pipeline.stop_playback_reference();
        assert!(!pipeline.is_likely_echo(&frame));

        // Active playback with a correlated frame
        pipeline.feed_playback_reference(&frame);
        assert!(pipeline.is_likely_echo(&frame));

        // Uncorrelated mic content during playback
        let other: Vec<f32> = (0..128)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 37.0).sin())
            .collect();
        assert!(!pipeline.is_likely_echo(&other));

        // Empty frames never score as echo
        assert!(!pipeline.is_likely_echo(&[]));

        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_update_config_changes_thresholds_live() {
        let (pipeline, _, _) = pipeline_with_stub();
        pipeline.initialize().await.unwrap();

        pipeline.update_config(PipelineConfigUpdate {
            resting_vad_threshold: Some(0.35),
            playback_vad_threshold: Some(0.9),
            ..Default::default()
        });

        assert_eq!(pipeline.current_vad_threshold(), 0.35);
        pipeline.feed_playback_reference(&[0.1; 32]);
        assert_eq!(pipeline.current_vad_threshold(), 0.9);

        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (pipeline, _, _) = pipeline_with_stub();
        pipeline.initialize().await.unwrap();
        pipeline.start_microphone().await.unwrap();

        pipeline.destroy().await;
        pipeline.destroy().await;

        let state = pipeline.state();
        assert!(!state.initialized);
        assert!(!state.microphone_active);
        assert!(state.aec.is_none());
    }

    #[tokio::test]
    async fn test_stop_microphone_safe_when_not_started() {
        let (pipeline, _, _) = pipeline_with_stub();
        pipeline.stop_microphone();
        pipeline.initialize().await.unwrap();
        pipeline.stop_microphone();
        pipeline.destroy().await;
    }

    #[tokio::test]
    async fn test_state_change_callbacks_fire() {
        let (pipeline, _, _) = pipeline_with_stub();

        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notifications);
        pipeline.on_state_change(Arc::new(move |_state| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }));

        pipeline.initialize().await.unwrap();
        pipeline.feed_playback_reference(&[0.1; 32]);
        pipeline.stop_playback_reference();
        pipeline.destroy().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(notifications.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_feed_playback_before_initialize_is_inert() {
        let (pipeline, _, _) = pipeline_with_stub();
        pipeline.feed_playback_reference(&[0.5; 32]);
        assert!(!pipeline.state().playback_active);
    }
}
