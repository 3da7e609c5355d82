//! Frequency-sampling FIR design.
//!
//! [`firwin2`] builds a linear-phase filter with an arbitrary magnitude
//! response: the desired gains are interpolated onto a uniform grid, given a
//! linear phase of `(n - 1) / 2` samples, inverse transformed and windowed.
//! [`design_correction`] feeds it the inverse of a measured microphone
//! response.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use super::CalibrationCurve;
use crate::CalibrationError;

/// Designs `numtaps` coefficients whose magnitude response follows the
/// piecewise-linear `(freq, gain)` specification.
///
/// `freq` is normalized to Nyquist: it must start at exactly `0.0`, end at
/// exactly `1.0` and be non-decreasing. A symmetric Hamming window is
/// applied. An even `numtaps` forces zero gain at Nyquist, so it is only
/// accepted when the last gain is zero.
pub fn firwin2(numtaps: usize, freq: &[f64], gain: &[f64]) -> Result<Vec<f64>, CalibrationError> {
    let ends_at_zero = gain.last().is_some_and(|g| *g == 0.0);
    if numtaps < 3 || (numtaps % 2 == 0 && !ends_at_zero) {
        return Err(CalibrationError::InvalidTapCount { taps: numtaps });
    }
    if freq.len() != gain.len() || freq.len() < 2 {
        return Err(CalibrationError::NoData);
    }

    let nfreqs = 1 + numtaps.next_power_of_two();
    let half_delay = (numtaps - 1) as f64 / 2.0;

    // Desired response on a uniform grid over [0, 1], with linear phase.
    let mut spectrum: Vec<Complex<f64>> = interp_uniform(nfreqs, freq, gain)
        .into_iter()
        .enumerate()
        .map(|(k, magnitude)| {
            let x = k as f64 / (nfreqs - 1) as f64;
            Complex::from_polar(magnitude, -half_delay * PI * x)
        })
        .collect();

    // Real inverse FFT: the DC and Nyquist bins only contribute their real
    // part, the upper half is the conjugate mirror of the lower half.
    let n = 2 * (nfreqs - 1);
    spectrum[0].im = 0.0;
    spectrum[nfreqs - 1].im = 0.0;
    let mirror: Vec<Complex<f64>> = spectrum[1..nfreqs - 1]
        .iter()
        .rev()
        .map(Complex::conj)
        .collect();
    spectrum.extend(mirror);

    let ifft = FftPlanner::new().plan_fft_inverse(n);
    ifft.process(&mut spectrum);

    let window = hamming(numtaps);
    Ok(spectrum
        .iter()
        .take(numtaps)
        .zip(window)
        .map(|(value, w)| value.re / n as f64 * w)
        .collect())
}

/// Designs the inverse-response correction filter for a measured curve.
///
/// Gains are inverted and linearized, frequencies normalized to the Nyquist
/// of `sample_rate`. Points at or beyond Nyquist (or at DC) can't be
/// represented and are skipped; the remaining curve is extended with
/// constant gain to exactly 0 and 1 before the design.
pub fn design_correction(
    curve: &CalibrationCurve,
    sample_rate: u32,
    numtaps: usize,
) -> Result<Vec<f64>, CalibrationError> {
    let nyquist = f64::from(sample_rate) / 2.0;

    let (mut freq, mut gain): (Vec<f64>, Vec<f64>) = curve
        .points()
        .iter()
        .map(|&(hz, db)| (hz / nyquist, 10f64.powf(-db / 20.0)))
        .filter(|&(x, _)| x > 0.0 && x < 1.0)
        .unzip();

    let skipped = curve.len() - freq.len();
    if skipped > 0 {
        tracing::warn!(
            skipped,
            nyquist_hz = nyquist,
            "Calibration points outside the representable band were ignored"
        );
    }

    let (Some(&first), Some(&last)) = (gain.first(), gain.last()) else {
        return Err(CalibrationError::NoPointsInBand { nyquist });
    };
    freq.insert(0, 0.0);
    gain.insert(0, first);
    freq.push(1.0);
    gain.push(last);

    tracing::debug!(numtaps, sample_rate, "Designing FIR correction filter");
    firwin2(numtaps, &freq, &gain)
}

/// Linearly interpolates `(freq, gain)` at `count` evenly spaced points over
/// `[0, 1]`. `freq` must be sorted.
fn interp_uniform(count: usize, freq: &[f64], gain: &[f64]) -> Vec<f64> {
    let mut segment = 0;
    (0..count)
        .map(|k| {
            let x = k as f64 / (count - 1) as f64;
            while segment + 2 < freq.len() && x > freq[segment + 1] {
                segment += 1;
            }
            let (x0, x1) = (freq[segment], freq[segment + 1]);
            let (y0, y1) = (gain[segment], gain[segment + 1]);
            if x <= x0 {
                y0
            } else if x >= x1 || x1 <= x0 {
                y1
            } else {
                y0 + (y1 - y0) * (x - x0) / (x1 - x0)
            }
        })
        .collect()
}

/// Symmetric Hamming window.
fn hamming(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}
