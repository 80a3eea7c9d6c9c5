//! Signal helpers shared by the echo canceller and the pipeline front-end.

/// Root-mean-square level of a frame.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|s| s * s).sum();
    (sum / frame.len() as f32).sqrt()
}

/// Frame level in dBFS, where a full-scale sine has RMS ~0.707.
///
/// Returns -120.0 for silent frames rather than negative infinity.
pub fn dbfs(frame: &[f32]) -> f32 {
    let level = rms(frame);
    if level <= 1e-6 {
        -120.0
    } else {
        20.0 * level.log10()
    }
}

/// Convert a gain in dB to a linear multiplier.
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Pearson correlation between two frames over their overlapping window.
///
/// Both frames are mean-subtracted before correlating, so a constant DC
/// offset does not register as similarity. Returns 0.0 when either frame is
/// empty or has no variance over the overlap.
pub fn normalized_cross_correlation(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let a = &a[..n];
    let b = &b[..n];

    let mean_a: f32 = a.iter().sum::<f32>() / n as f32;
    let mean_b: f32 = b.iter().sum::<f32>() / n as f32;

    let mut cov = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;

    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom <= 1e-10 {
        return 0.0;
    }

    cov / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, period: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / period as f32).sin())
            .collect()
    }

    #[test]
    fn test_rms_of_empty_frame() {
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_of_constant_frame() {
        let frame = vec![0.5f32; 64];
        assert!((rms(&frame) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dbfs_silence_floor() {
        assert_eq!(dbfs(&[0.0; 32]), -120.0);
    }

    #[test]
    fn test_dbfs_full_scale() {
        // Constant 1.0 has RMS 1.0 -> 0 dBFS
        let frame = vec![1.0f32; 32];
        assert!(dbfs(&frame).abs() < 1e-3);
    }

    #[test]
    fn test_db_to_linear() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(6.0) - 1.9953).abs() < 1e-3);
        assert!((db_to_linear(-6.0) - 0.5012).abs() < 1e-3);
    }

    #[test]
    fn test_correlation_identical_frames() {
        let frame = sine(256, 32);
        let corr = normalized_cross_correlation(&frame, &frame);
        assert!((corr - 1.0).abs() < 1e-5, "corr = {corr}");
    }

    #[test]
    fn test_correlation_inverted_frames() {
        let frame = sine(256, 32);
        let inverted: Vec<f32> = frame.iter().map(|s| -s).collect();
        let corr = normalized_cross_correlation(&frame, &inverted);
        assert!((corr + 1.0).abs() < 1e-5, "corr = {corr}");
    }

    #[test]
    fn test_correlation_scaled_copy_still_correlates() {
        // Attenuated echo of the same signal should correlate strongly
        let frame = sine(256, 32);
        let quiet: Vec<f32> = frame.iter().map(|s| s * 0.1).collect();
        let corr = normalized_cross_correlation(&frame, &quiet);
        assert!(corr > 0.99, "corr = {corr}");
    }

    #[test]
    fn test_correlation_uncorrelated_signals() {
        // Orthogonal sinusoids over a whole number of periods
        let a = sine(256, 32);
        let b = sine(256, 64);
        let corr = normalized_cross_correlation(&a, &b);
        assert!(corr.abs() < 0.05, "corr = {corr}");
    }

    #[test]
    fn test_correlation_empty_and_constant_inputs() {
        assert_eq!(normalized_cross_correlation(&[], &[1.0, 2.0]), 0.0);
        assert_eq!(normalized_cross_correlation(&[1.0, 2.0], &[]), 0.0);
        // Zero variance on one side
        let flat = vec![0.3f32; 64];
        let varied = sine(64, 16);
        assert_eq!(normalized_cross_correlation(&flat, &varied), 0.0);
    }

    #[test]
    fn test_correlation_uses_overlap_window() {
        // Different lengths: correlation computed over the shorter frame
        let long = sine(512, 32);
        let short = sine(128, 32);
        let corr = normalized_cross_correlation(&long, &short);
        assert!((corr - 1.0).abs() < 1e-5);
    }
}
