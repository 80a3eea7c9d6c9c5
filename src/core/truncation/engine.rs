//! Utterance tracking and barge-in truncation.
//!
//! The engine tracks one assistant utterance at a time: callers report
//! playback progress as audio plays, and when the user barges in,
//! [`TruncationEngine::calculate_truncation`] computes the cleanest cut
//! point and what remains unsaid. Truncation always succeeds; with no
//! usable boundary the cut is simply mid-word.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{MonotonicClock, SharedClock};

use super::boundary::{find_best_truncation_point, split_at_char, TruncationKind};
use super::prompts;

/// Tuning for progress estimation and continuation decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncationConfig {
    /// Speech rate used when no explicit progress was reported.
    pub chars_per_second: f64,
    /// Audio fade-out applied at the cut, regardless of boundary class. A
    /// consistent short fade avoids an audible click.
    pub audio_fade_ms: u64,
    /// Remainders shorter than this are not worth continuing.
    pub min_continuation_chars: usize,
    /// After a clean sentence cut, remainders shorter than this already
    /// form a complete thought.
    pub min_sentence_continuation_chars: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            chars_per_second: 15.0,
            audio_fade_ms: 50,
            min_continuation_chars: 20,
            min_sentence_continuation_chars: 100,
        }
    }
}

impl TruncationConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the estimated speech rate in characters per second.
    pub fn set_chars_per_second(mut self, rate: f64) -> Self {
        self.chars_per_second = rate;
        self
    }

    /// Set the audio fade duration in milliseconds.
    pub fn set_audio_fade_ms(mut self, fade_ms: u64) -> Self {
        self.audio_fade_ms = fade_ms;
        self
    }
}

/// The outcome of one barge-in event.
///
/// Invariant: `spoken_text + unspoken_text` equals the original utterance,
/// and `position` is a valid character index into it.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncationInfo {
    /// Boundary class of the cut.
    pub kind: TruncationKind,
    /// Text treated as already spoken.
    pub spoken_text: String,
    /// Text that was never spoken.
    pub unspoken_text: String,
    /// True only for sentence and phrase cuts.
    pub was_graceful: bool,
    /// Fade to apply when stopping audio, in milliseconds.
    pub audio_fade_ms: u64,
    /// Character index of the cut in the original text.
    pub position: usize,
}

/// Callback invoked when a truncation is computed. Runs synchronously on
/// the thread driving playback progress; barge-in is rare and off the
/// per-frame path.
pub type TruncationCallback = Arc<dyn Fn(&TruncationInfo) + Send + Sync>;

/// Tracks one assistant utterance and computes its interruption point.
///
/// Mutated only by the thread driving playback progress. Repeated
/// [`calculate_truncation`](Self::calculate_truncation) calls before the
/// next [`start_tracking`](Self::start_tracking) recompute the same
/// in-flight utterance, overwriting the retained result.
pub struct TruncationEngine {
    config: TruncationConfig,
    clock: SharedClock,
    full_response: String,
    spoken_text: String,
    progress_reported: bool,
    started_at: Option<Instant>,
    last_truncation: Option<TruncationInfo>,
    callback: Option<TruncationCallback>,
}

impl TruncationEngine {
    /// Create an engine with the default monotonic clock.
    pub fn new(config: TruncationConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    /// Create an engine with an injected clock.
    pub fn with_clock(config: TruncationConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            full_response: String::new(),
            spoken_text: String::new(),
            progress_reported: false,
            started_at: None,
            last_truncation: None,
            callback: None,
        }
    }

    /// Register a callback fired whenever a truncation is computed.
    pub fn on_truncation(&mut self, callback: TruncationCallback) {
        self.callback = Some(callback);
    }

    /// Begin tracking a new utterance, resetting spoken-text state.
    pub fn start_tracking(&mut self, full_response: impl Into<String>) {
        self.full_response = full_response.into();
        self.spoken_text.clear();
        self.progress_reported = false;
        self.started_at = Some(self.clock.now());
        debug!(
            "tracking utterance of {} chars",
            self.full_response.chars().count()
        );
    }

    /// Report the exact spoken substring so far.
    pub fn update_progress(&mut self, spoken_so_far: &str) {
        self.spoken_text = spoken_so_far.to_string();
        self.progress_reported = true;
    }

    /// Report progress as a character count, clamped to the utterance
    /// length.
    pub fn update_progress_by_chars(&mut self, chars: usize) {
        let clamped = chars.min(self.full_response.chars().count());
        self.spoken_text = self.full_response.chars().take(clamped).collect();
        self.progress_reported = true;
    }

    /// Time-based estimate of spoken characters, used only when no explicit
    /// progress was ever reported.
    pub fn estimate_spoken_chars(&self, elapsed_audio_ms: u64) -> usize {
        (elapsed_audio_ms as f64 / 1000.0 * self.config.chars_per_second).floor() as usize
    }

    /// Time since tracking started, zero when not tracking.
    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started_at) => self.clock.now().duration_since(started_at),
            None => Duration::ZERO,
        }
    }

    /// Compute the cut point for a barge-in happening now.
    ///
    /// Explicitly tracked text takes precedence over the time-based
    /// estimate. The result is retained as the last truncation and handed
    /// to the registered callback.
    pub fn calculate_truncation(&mut self) -> TruncationInfo {
        let spoken_chars = if self.progress_reported {
            self.spoken_text.chars().count()
        } else {
            self.estimate_spoken_chars(self.elapsed().as_millis() as u64)
        };

        let (position, kind) = find_best_truncation_point(&self.full_response, spoken_chars);
        let (spoken_text, unspoken_text) = split_at_char(&self.full_response, position);

        let info = TruncationInfo {
            kind,
            was_graceful: kind.is_graceful(),
            audio_fade_ms: self.config.audio_fade_ms,
            position,
            spoken_text,
            unspoken_text,
        };

        info!(
            "utterance truncated at char {} ({}), {} chars unspoken",
            position,
            kind.as_str(),
            info.unspoken_text.chars().count()
        );

        self.last_truncation = Some(info.clone());
        if let Some(callback) = &self.callback {
            callback(&info);
        }
        info
    }

    /// The most recent truncation, if any.
    pub fn last_truncation(&self) -> Option<&TruncationInfo> {
        self.last_truncation.as_ref()
    }

    /// The spoken text tracked so far.
    pub fn current_spoken_text(&self) -> &str {
        &self.spoken_text
    }

    /// The full utterance being tracked.
    pub fn full_response(&self) -> &str {
        &self.full_response
    }

    /// Whether the unspoken remainder is worth offering to continue.
    ///
    /// False with no truncation yet, when the remainder is trivially short,
    /// or when a clean sentence cut left only a short tail.
    pub fn should_offer_continuation(&self) -> bool {
        let Some(info) = &self.last_truncation else {
            return false;
        };

        let remaining = info.unspoken_text.chars().count();
        if remaining < self.config.min_continuation_chars {
            return false;
        }
        if info.kind == TruncationKind::Sentence
            && remaining < self.config.min_sentence_continuation_chars
        {
            return false;
        }
        true
    }

    /// Lead-in phrase for responding to the interrupting utterance, chosen
    /// by lexical cues. `None` when a graceful cut needs no lead-in.
    pub fn generate_acknowledgment(&self, user_utterance: &str) -> Option<String> {
        let graceful = self
            .last_truncation
            .as_ref()
            .map(|info| info.was_graceful)
            .unwrap_or(false);
        prompts::acknowledgment(user_utterance, graceful)
    }

    /// Clear all tracking state between utterances.
    pub fn reset(&mut self) {
        self.full_response.clear();
        self.spoken_text.clear();
        self.progress_reported = false;
        self.started_at = None;
        self.last_truncation = None;
    }
}

impl Default for TruncationEngine {
    fn default() -> Self {
        Self::new(TruncationConfig::default())
    }
}
