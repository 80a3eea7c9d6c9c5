//! Acoustic echo cancellation.
//!
//! A normalized least-mean-squares (NLMS) adaptive filter estimates the
//! echo path from the playback reference to the microphone and subtracts
//! the predicted echo from each mic sample. A Geigel-style detector freezes
//! adaptation during double-talk so near-end speech does not corrupt the
//! filter.
//!
//! Cancellation is best-effort: numerical trouble or a starved reference
//! never raises to the caller, it only shows up in the metrics.

use std::collections::VecDeque;

use tracing::debug;

use super::errors::{PipelineError, PipelineResult};
use super::state::AecMetrics;

/// Fixed NLMS adaptation step size.
const STEP_SIZE: f32 = 0.5;

/// Regularization term keeping the normalized update stable on quiet
/// reference signals.
const ENERGY_EPSILON: f32 = 1e-6;

/// Geigel detector threshold: double-talk is declared when the mic peak
/// exceeds this fraction of the recent reference peak.
const DOUBLE_TALK_RATIO: f32 = 0.5;

/// Reference peaks below this level mean no far-end audio worth comparing
/// against.
const REFERENCE_FLOOR: f32 = 1e-4;

/// Smoothing factor for the ERLE moving average.
const ERLE_ALPHA: f32 = 0.9;

/// Cap on buffered reference samples (1 second at 16 kHz). Playback fed
/// faster than the microphone drains is truncated from the oldest end.
const MAX_PENDING_REFERENCE: usize = 16_000;

/// NLMS adaptive echo canceller.
///
/// Owned exclusively by the pipeline's processing task; all methods take
/// `&mut self` and the struct is never shared.
pub(crate) struct EchoCanceller {
    /// Adaptive FIR taps, index 0 weighting the newest reference sample.
    weights: Vec<f32>,
    /// Delay line of the most recent `weights.len()` reference samples,
    /// newest first.
    delay_line: VecDeque<f32>,
    /// Reference samples fed by playback but not yet consumed against mic
    /// samples.
    pending_reference: VecDeque<f32>,
    /// Running energy of the delay line, maintained incrementally.
    reference_energy: f32,
    erle_db: f32,
    double_talk: bool,
    /// Whether the last processed frame had real reference samples.
    reference_active: bool,
    frames_processed: u64,
}

impl EchoCanceller {
    /// Create a canceller with the given filter length in samples.
    pub fn new(filter_length: usize) -> PipelineResult<Self> {
        if filter_length == 0 {
            return Err(PipelineError::Initialization(
                "AEC filter length is zero; check tail length and sample rate".to_string(),
            ));
        }

        debug!("AEC: created NLMS canceller with {} taps", filter_length);

        Ok(Self {
            weights: vec![0.0; filter_length],
            delay_line: VecDeque::from(vec![0.0; filter_length]),
            pending_reference: VecDeque::new(),
            reference_energy: 0.0,
            erle_db: 0.0,
            double_talk: false,
            reference_active: false,
            frames_processed: 0,
        })
    }

    /// Queue a playback-reference frame for cancellation.
    pub fn push_reference(&mut self, frame: &[f32]) {
        self.pending_reference.extend(frame.iter().copied());
        while self.pending_reference.len() > MAX_PENDING_REFERENCE {
            self.pending_reference.pop_front();
        }
    }

    /// Cancel echo from one microphone frame, returning the cleaned frame.
    pub fn process(&mut self, mic: &[f32]) -> Vec<f32> {
        self.frames_processed += 1;

        let consumed_reference = self.pending_reference.len().min(mic.len());
        self.reference_active = consumed_reference > 0;

        self.double_talk = self.detect_double_talk(mic);
        let adapt = !self.double_talk;

        let mut output = Vec::with_capacity(mic.len());
        let mut in_power = 0.0f32;
        let mut out_power = 0.0f32;

        for &mic_sample in mic {
            let reference_sample = self.pending_reference.pop_front().unwrap_or(0.0);
            self.advance_delay_line(reference_sample);

            let predicted: f32 = self
                .weights
                .iter()
                .zip(self.delay_line.iter())
                .map(|(w, x)| w * x)
                .sum();
            let error = mic_sample - predicted;

            if adapt {
                let gain = STEP_SIZE * error / (self.reference_energy + ENERGY_EPSILON);
                for (w, &x) in self.weights.iter_mut().zip(self.delay_line.iter()) {
                    *w += gain * x;
                }
            }

            in_power += mic_sample * mic_sample;
            out_power += error * error;
            output.push(error);
        }

        if self.reference_active && !mic.is_empty() {
            self.update_erle(in_power / mic.len() as f32, out_power / mic.len() as f32);
        }

        output
    }

    /// Clear adaptive state after a reconnect or a long silence where the
    /// echo path may have drifted.
    pub fn reset(&mut self) {
        self.weights.fill(0.0);
        self.delay_line.iter_mut().for_each(|x| *x = 0.0);
        self.pending_reference.clear();
        self.reference_energy = 0.0;
        self.erle_db = 0.0;
        self.double_talk = false;
        self.reference_active = false;
        debug!("AEC: adaptive filter state reset");
    }

    /// Assemble a metrics snapshot; frame timing is measured by the caller.
    pub fn metrics(&self, avg_frame_time_us: f32) -> AecMetrics {
        AecMetrics {
            is_active: self.reference_active,
            erle_db: self.erle_db,
            double_talk_detected: self.double_talk,
            frames_processed: self.frames_processed,
            avg_frame_time_us,
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    fn advance_delay_line(&mut self, sample: f32) {
        if let Some(oldest) = self.delay_line.pop_back() {
            self.reference_energy -= oldest * oldest;
        }
        self.delay_line.push_front(sample);
        self.reference_energy += sample * sample;
        // Incremental subtraction can drift slightly negative on long runs
        if self.reference_energy < 0.0 {
            self.reference_energy = 0.0;
        }
    }

    fn detect_double_talk(&self, mic: &[f32]) -> bool {
        let reference_peak = self
            .delay_line
            .iter()
            .chain(self.pending_reference.iter().take(mic.len()))
            .fold(0.0f32, |peak, &x| peak.max(x.abs()));

        if reference_peak < REFERENCE_FLOOR {
            return false;
        }

        let mic_peak = mic.iter().fold(0.0f32, |peak, &x| peak.max(x.abs()));
        mic_peak > DOUBLE_TALK_RATIO * reference_peak
    }

    fn update_erle(&mut self, in_power: f32, out_power: f32) {
        if in_power <= ENERGY_EPSILON || out_power <= 0.0 {
            return;
        }
        let instantaneous = 10.0 * (in_power / out_power.max(1e-12)).log10();
        self.erle_db = ERLE_ALPHA * self.erle_db + (1.0 - ERLE_ALPHA) * instantaneous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random samples in [-amplitude, amplitude].
    fn noise(len: usize, amplitude: f32, seed: &mut u64) -> Vec<f32> {
        (0..len)
            .map(|_| {
                *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let unit = ((*seed >> 33) as f32 / (1u64 << 30) as f32) - 1.0;
                unit * amplitude
            })
            .collect()
    }

    fn power(frame: &[f32]) -> f32 {
        frame.iter().map(|s| s * s).sum::<f32>() / frame.len().max(1) as f32
    }

    #[test]
    fn test_zero_filter_length_rejected() {
        let result = EchoCanceller::new(0);
        assert!(matches!(result, Err(PipelineError::Initialization(_))));
    }

    #[test]
    fn test_passthrough_without_reference() {
        let mut aec = EchoCanceller::new(64).unwrap();
        let mic = vec![0.25f32; 128];
        let out = aec.process(&mic);

        // No reference: zero-weight filter predicts zero echo
        assert_eq!(out, mic);
        assert!(!aec.metrics(0.0).is_active);
    }

    #[test]
    fn test_converges_on_attenuated_echo() {
        let mut aec = EchoCanceller::new(64).unwrap();
        let mut seed = 7u64;

        let mut last_in = 0.0;
        let mut last_out = 0.0;
        for _ in 0..40 {
            let reference = noise(128, 0.8, &mut seed);
            // Echo path: pure attenuation, no delay
            let mic: Vec<f32> = reference.iter().map(|s| s * 0.4).collect();

            aec.push_reference(&reference);
            let out = aec.process(&mic);

            last_in = power(&mic);
            last_out = power(&out);
        }

        assert!(
            last_out < 0.1 * last_in,
            "residual echo power {last_out} vs input {last_in}"
        );
        let metrics = aec.metrics(0.0);
        assert!(metrics.is_active);
        assert!(metrics.erle_db > 6.0, "ERLE {} dB", metrics.erle_db);
        assert!(!metrics.double_talk_detected);
        assert_eq!(metrics.frames_processed, 40);
    }

    #[test]
    fn test_double_talk_detected_and_adaptation_frozen() {
        let mut aec = EchoCanceller::new(64).unwrap();
        let mut seed = 3u64;

        // Converge first on echo-only frames
        for _ in 0..30 {
            let reference = noise(128, 0.8, &mut seed);
            let mic: Vec<f32> = reference.iter().map(|s| s * 0.3).collect();
            aec.push_reference(&reference);
            aec.process(&mic);
        }
        let converged_weights = aec.weights.clone();
        assert!(!aec.metrics(0.0).double_talk_detected);

        // Near-end speech much louder than the echo
        let reference = noise(128, 0.2, &mut seed);
        let near_end = noise(128, 0.9, &mut seed);
        let mic: Vec<f32> = reference
            .iter()
            .zip(near_end.iter())
            .map(|(r, n)| r * 0.3 + n)
            .collect();

        aec.push_reference(&reference);
        aec.process(&mic);

        assert!(aec.metrics(0.0).double_talk_detected);
        assert_eq!(
            aec.weights, converged_weights,
            "weights must not adapt during double-talk"
        );
    }

    #[test]
    fn test_silent_reference_is_not_double_talk() {
        let mut aec = EchoCanceller::new(32).unwrap();
        let mut seed = 11u64;

        // User speaking with no playback at all
        let mic = noise(128, 0.7, &mut seed);
        aec.process(&mic);

        assert!(!aec.metrics(0.0).double_talk_detected);
    }

    #[test]
    fn test_reset_clears_adaptive_state() {
        let mut aec = EchoCanceller::new(32).unwrap();
        let mut seed = 5u64;

        for _ in 0..10 {
            let reference = noise(64, 0.8, &mut seed);
            let mic: Vec<f32> = reference.iter().map(|s| s * 0.4).collect();
            aec.push_reference(&reference);
            aec.process(&mic);
        }
        assert!(aec.weights.iter().any(|w| w.abs() > 1e-4));

        aec.reset();

        assert!(aec.weights.iter().all(|&w| w == 0.0));
        assert_eq!(aec.reference_energy, 0.0);
        assert!(aec.pending_reference.is_empty());
        assert_eq!(aec.metrics(0.0).erle_db, 0.0);
        // Frame counter survives reset
        assert_eq!(aec.frames_processed(), 10);
    }

    #[test]
    fn test_pending_reference_bounded() {
        let mut aec = EchoCanceller::new(32).unwrap();
        let frame = vec![0.1f32; 4096];
        for _ in 0..10 {
            aec.push_reference(&frame);
        }
        assert!(aec.pending_reference.len() <= MAX_PENDING_REFERENCE);
    }

    #[test]
    fn test_empty_mic_frame() {
        let mut aec = EchoCanceller::new(32).unwrap();
        aec.push_reference(&[0.5; 64]);
        let out = aec.process(&[]);
        assert!(out.is_empty());
    }
}
