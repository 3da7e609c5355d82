//! Signal level: RMS and dBFS.

/// Added to the RMS before taking the log so silence stays finite.
const LOG_EPSILON: f64 = 1e-10;

/// Root mean square of `samples`; `0.0` for an empty slice.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Level of an RMS value relative to full scale, never below `floor`.
pub fn dbfs(rms: f64, floor: f64) -> f64 {
    let level = 20.0 * (rms + LOG_EPSILON).log10();
    if level > floor {
        level
    } else {
        floor
    }
}
