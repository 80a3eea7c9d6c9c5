//! Configuration for the duplex audio pipeline.
//!
//! The pipeline is configured once per voice session. Detection thresholds
//! come in two flavors: resting values used when no assistant audio is
//! playing, and elevated values used while playback is active so that the
//! assistant's own voice leaking into the microphone is not mistaken for a
//! user interruption.

use serde::{Deserialize, Serialize};

/// Aggressiveness of noise suppression requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseSuppressionLevel {
    /// Minimal suppression, lowest speech distortion.
    Low,
    /// Balanced suppression, suitable for most environments.
    #[default]
    Moderate,
    /// Aggressive suppression for noisy environments.
    High,
    /// Maximum suppression, may distort quiet speech.
    VeryHigh,
}

/// Immutable per-session configuration for the duplex audio pipeline.
///
/// Defaults follow the recommended full-duplex setup: AEC with a 128 ms
/// filter tail, moderate noise suppression, AGC targeting -3 dBFS, and
/// detection thresholds that tighten while assistant audio is playing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Whether acoustic echo cancellation is enabled.
    pub echo_cancellation: bool,

    /// Length of the adaptive filter tail in milliseconds.
    ///
    /// Longer tails cancel longer acoustic reflections at the cost of more
    /// per-sample work and slower adaptation. 128 ms covers typical room
    /// reverberation.
    pub aec_tail_ms: u32,

    /// Whether noise suppression is requested from the capture device.
    pub noise_suppression: bool,

    /// Requested noise suppression aggressiveness.
    pub noise_suppression_level: NoiseSuppressionLevel,

    /// Whether automatic gain control is enabled.
    pub auto_gain_control: bool,

    /// AGC target level in dBFS.
    pub agc_target_dbfs: f32,

    /// VAD speech-probability threshold while assistant audio is playing.
    ///
    /// Deliberately higher than the resting threshold: residual echo raises
    /// the apparent speech probability, so detection must be less sensitive
    /// during playback.
    pub playback_vad_threshold: f32,

    /// VAD speech-probability threshold while no audio is playing.
    pub resting_vad_threshold: f32,

    /// Minimum sustained speech duration (ms) to confirm an interruption
    /// while assistant audio is playing.
    pub playback_min_speech_ms: u64,

    /// Minimum sustained speech duration (ms) while no audio is playing.
    pub resting_min_speech_ms: u64,

    /// Sample rate of microphone and playback-reference audio in Hz.
    pub sample_rate: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            aec_tail_ms: 128,
            noise_suppression: true,
            noise_suppression_level: NoiseSuppressionLevel::Moderate,
            auto_gain_control: true,
            agc_target_dbfs: -3.0,
            playback_vad_threshold: 0.7,
            resting_vad_threshold: 0.5,
            playback_min_speech_ms: 200,
            resting_min_speech_ms: 150,
            sample_rate: 16_000,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adaptive filter length in samples for the configured tail and rate.
    pub fn filter_length(&self) -> usize {
        (self.aec_tail_ms as usize * self.sample_rate as usize) / 1000
    }

    /// Set the AEC filter tail length in milliseconds.
    pub fn set_aec_tail_ms(mut self, tail_ms: u32) -> Self {
        self.aec_tail_ms = tail_ms;
        self
    }

    /// Set the VAD threshold used while playback is active.
    pub fn set_playback_vad_threshold(mut self, threshold: f32) -> Self {
        self.playback_vad_threshold = threshold;
        self
    }

    /// Set the VAD threshold used while playback is idle.
    pub fn set_resting_vad_threshold(mut self, threshold: f32) -> Self {
        self.resting_vad_threshold = threshold;
        self
    }

    /// Set the sample rate in Hz.
    pub fn set_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Disable echo cancellation.
    pub fn without_echo_cancellation(mut self) -> Self {
        self.echo_cancellation = false;
        self
    }

    /// Merge an update into this configuration, field by field.
    pub fn apply_update(&mut self, update: &PipelineConfigUpdate) {
        if let Some(v) = update.echo_cancellation {
            self.echo_cancellation = v;
        }
        if let Some(v) = update.aec_tail_ms {
            self.aec_tail_ms = v;
        }
        if let Some(v) = update.noise_suppression {
            self.noise_suppression = v;
        }
        if let Some(v) = update.noise_suppression_level {
            self.noise_suppression_level = v;
        }
        if let Some(v) = update.auto_gain_control {
            self.auto_gain_control = v;
        }
        if let Some(v) = update.agc_target_dbfs {
            self.agc_target_dbfs = v;
        }
        if let Some(v) = update.playback_vad_threshold {
            self.playback_vad_threshold = v;
        }
        if let Some(v) = update.resting_vad_threshold {
            self.resting_vad_threshold = v;
        }
        if let Some(v) = update.playback_min_speech_ms {
            self.playback_min_speech_ms = v;
        }
        if let Some(v) = update.resting_min_speech_ms {
            self.resting_min_speech_ms = v;
        }
        if let Some(v) = update.sample_rate {
            self.sample_rate = v;
        }
    }
}

/// Partial configuration applied to a live pipeline.
///
/// Only fields set to `Some` are merged; all others keep their current
/// values. AEC-relevant fields are forwarded to the processing task without
/// re-initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfigUpdate {
    pub echo_cancellation: Option<bool>,
    pub aec_tail_ms: Option<u32>,
    pub noise_suppression: Option<bool>,
    pub noise_suppression_level: Option<NoiseSuppressionLevel>,
    pub auto_gain_control: Option<bool>,
    pub agc_target_dbfs: Option<f32>,
    pub playback_vad_threshold: Option<f32>,
    pub resting_vad_threshold: Option<f32>,
    pub playback_min_speech_ms: Option<u64>,
    pub resting_min_speech_ms: Option<u64>,
    pub sample_rate: Option<u32>,
}

impl PipelineConfigUpdate {
    /// True if any AEC-relevant field is present in this update.
    pub fn touches_aec(&self) -> bool {
        self.echo_cancellation.is_some()
            || self.aec_tail_ms.is_some()
            || self.sample_rate.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = PipelineConfig::default();
        assert!(config.echo_cancellation);
        assert_eq!(config.aec_tail_ms, 128);
        assert!(config.noise_suppression);
        assert_eq!(
            config.noise_suppression_level,
            NoiseSuppressionLevel::Moderate
        );
        assert!(config.auto_gain_control);
        assert_eq!(config.agc_target_dbfs, -3.0);
        assert_eq!(config.playback_vad_threshold, 0.7);
        assert_eq!(config.resting_vad_threshold, 0.5);
        assert_eq!(config.playback_min_speech_ms, 200);
        assert_eq!(config.resting_min_speech_ms, 150);
        assert_eq!(config.sample_rate, 16_000);
    }

    #[test]
    fn test_filter_length_from_tail() {
        let config = PipelineConfig::default();
        // 128 ms at 16 kHz
        assert_eq!(config.filter_length(), 2048);

        let config = PipelineConfig::default()
            .set_aec_tail_ms(64)
            .set_sample_rate(8000);
        assert_eq!(config.filter_length(), 512);
    }

    #[test]
    fn test_builder_methods() {
        let config = PipelineConfig::new()
            .set_playback_vad_threshold(0.8)
            .set_resting_vad_threshold(0.4)
            .without_echo_cancellation();

        assert_eq!(config.playback_vad_threshold, 0.8);
        assert_eq!(config.resting_vad_threshold, 0.4);
        assert!(!config.echo_cancellation);
    }

    #[test]
    fn test_apply_update_merges_only_set_fields() {
        let mut config = PipelineConfig::default();
        let update = PipelineConfigUpdate {
            playback_vad_threshold: Some(0.85),
            aec_tail_ms: Some(256),
            ..Default::default()
        };

        config.apply_update(&update);

        assert_eq!(config.playback_vad_threshold, 0.85);
        assert_eq!(config.aec_tail_ms, 256);
        // Untouched fields keep defaults
        assert_eq!(config.resting_vad_threshold, 0.5);
        assert!(config.echo_cancellation);
    }

    #[test]
    fn test_update_touches_aec() {
        let update = PipelineConfigUpdate {
            aec_tail_ms: Some(64),
            ..Default::default()
        };
        assert!(update.touches_aec());

        let update = PipelineConfigUpdate {
            playback_vad_threshold: Some(0.9),
            ..Default::default()
        };
        assert!(!update.touches_aec());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_noise_suppression_level_serde_names() {
        let json = serde_json::to_string(&NoiseSuppressionLevel::VeryHigh).unwrap();
        assert_eq!(json, "\"very_high\"");

        let level: NoiseSuppressionLevel = serde_json::from_str("\"moderate\"").unwrap();
        assert_eq!(level, NoiseSuppressionLevel::Moderate);
    }
}
