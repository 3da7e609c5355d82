//! Spectral flux (onset strength).
//!
//! The block is turned into a log-power mel spectrogram (centered STFT,
//! 2048-point periodic Hann window, hop 512, 128 Slaney mel bands, 80 dB
//! dynamic range). The onset envelope is the band-averaged positive
//! difference between consecutive frames; flux is its peak. Steady noise
//! scores low, new sound events score high.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

const N_FFT: usize = 2048;
const HOP: usize = 512;
const N_MELS: usize = 128;
const AMIN: f64 = 1e-10;
const TOP_DB: f64 = 80.0;

/// One mel band: first FFT bin it covers and the weights from there on.
#[derive(Debug, Clone)]
struct MelBand {
    start: usize,
    weights: Vec<f64>,
}

/// Reusable spectral-flux calculator for one sample rate.
#[derive(Clone)]
pub struct SpectralFlux {
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    bands: Vec<MelBand>,
}

impl std::fmt::Debug for SpectralFlux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralFlux")
            .field("n_fft", &N_FFT)
            .field("hop", &HOP)
            .field("bands", &self.bands.len())
            .finish_non_exhaustive()
    }
}

impl SpectralFlux {
    /// Builds the window, FFT plan and mel filterbank for `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(N_FFT);
        let window = (0..N_FFT)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / N_FFT as f64).cos())
            .collect();
        Self {
            fft,
            window,
            bands: mel_filterbank(f64::from(sample_rate)),
        }
    }

    /// Peak of the onset envelope; `0.0` when the block spans fewer than
    /// two STFT frames.
    pub fn peak(&self, samples: &[f32]) -> f64 {
        self.onset_envelope(samples)
            .into_iter()
            .fold(0.0, f64::max)
    }

    /// Onset strength per STFT frame. The first frame is always zero.
    pub fn onset_envelope(&self, samples: &[f32]) -> Vec<f64> {
        let spectrogram = self.mel_db(samples);
        let mut envelope = vec![0.0; spectrogram.len()];
        for t in 1..spectrogram.len() {
            let rise: f64 = spectrogram[t]
                .iter()
                .zip(&spectrogram[t - 1])
                .map(|(now, before)| (now - before).max(0.0))
                .sum();
            envelope[t] = rise / N_MELS as f64;
        }
        envelope
    }

    /// Log-power mel spectrogram, one `Vec` of band levels per frame.
    fn mel_db(&self, samples: &[f32]) -> Vec<Vec<f64>> {
        if samples.is_empty() {
            return Vec::new();
        }

        // Centered frames: zero padding of half a window on each side.
        let pad = N_FFT / 2;
        let mut padded = vec![0.0; samples.len() + 2 * pad];
        for (dst, &src) in padded[pad..].iter_mut().zip(samples) {
            *dst = f64::from(src);
        }
        let n_frames = 1 + (padded.len() - N_FFT) / HOP;

        let mut buffer = vec![Complex::new(0.0, 0.0); N_FFT];
        let mut frames: Vec<Vec<f64>> = (0..n_frames)
            .map(|t| {
                let offset = t * HOP;
                for (i, slot) in buffer.iter_mut().enumerate() {
                    *slot = Complex::new(padded[offset + i] * self.window[i], 0.0);
                }
                self.fft.process(&mut buffer);
                let power: Vec<f64> = buffer[..=N_FFT / 2].iter().map(Complex::norm_sqr).collect();

                self.bands
                    .iter()
                    .map(|band| {
                        let energy: f64 = band
                            .weights
                            .iter()
                            .zip(&power[band.start..])
                            .map(|(w, p)| w * p)
                            .sum();
                        10.0 * energy.max(AMIN).log10()
                    })
                    .collect()
            })
            .collect();

        let peak = frames
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = peak - TOP_DB;
        for value in frames.iter_mut().flatten() {
            *value = value.max(floor);
        }
        frames
    }
}

/// Slaney-style mel filterbank over `1 + N_FFT / 2` bins, area normalized.
fn mel_filterbank(sample_rate: f64) -> Vec<MelBand> {
    let n_bins = 1 + N_FFT / 2;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate / N_FFT as f64)
        .collect();

    let max_mel = hz_to_mel(sample_rate / 2.0);
    let mel_freqs: Vec<f64> = (0..N_MELS + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (N_MELS + 1) as f64))
        .collect();

    (0..N_MELS)
        .map(|m| {
            let (left, center, right) = (mel_freqs[m], mel_freqs[m + 1], mel_freqs[m + 2]);
            let norm = 2.0 / (right - left);
            let weights: Vec<f64> = fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    lower.min(upper).max(0.0) * norm
                })
                .collect();

            let start = weights.iter().position(|&w| w > 0.0).unwrap_or(0);
            let end = weights
                .iter()
                .rposition(|&w| w > 0.0)
                .map_or(start, |i| i + 1);
            MelBand {
                start,
                weights: weights[start..end.max(start)].to_vec(),
            }
        })
        .collect()
}

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;
const MEL_MIN_LOG_MEL: f64 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (hz / MEL_MIN_LOG_HZ).ln() / mel_log_step()
    } else {
        hz / MEL_F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_log_step() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        MEL_F_SP * mel
    }
}
