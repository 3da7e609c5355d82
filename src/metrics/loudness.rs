//! Integrated loudness (ITU-R BS.1770).
//!
//! The signal is K-weighted (a +4 dB high shelf around 1.5 kHz followed by a
//! 38 Hz high pass), split into 400 ms blocks with 75% overlap, and the mean
//! square of the blocks that pass an absolute gate (-70 LUFS) and a relative
//! gate (10 LU below the gated mean) gives the loudness.

use std::f64::consts::PI;

/// Gating block length.
pub const BLOCK_SECONDS: f64 = 0.4;

const OVERLAP: f64 = 0.75;
const ABSOLUTE_GATE: f64 = -70.0;
const RELATIVE_GATE: f64 = -10.0;
const LOUDNESS_OFFSET: f64 = -0.691;

/// Second-order IIR section with `a0` normalized to 1.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 3],
}

impl Biquad {
    fn high_shelf(gain_db: f64, q: f64, fc: f64, sample_rate: f64) -> Self {
        let a = 10f64.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * fc / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();
        let sqrt_a = a.sqrt();

        let b0 = a * ((a + 1.0) + (a - 1.0) * cos + 2.0 * sqrt_a * alpha);
        let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos);
        let b2 = a * ((a + 1.0) + (a - 1.0) * cos - 2.0 * sqrt_a * alpha);
        let a0 = (a + 1.0) - (a - 1.0) * cos + 2.0 * sqrt_a * alpha;
        let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos);
        let a2 = (a + 1.0) - (a - 1.0) * cos - 2.0 * sqrt_a * alpha;

        Self::normalized([b0, b1, b2], [a0, a1, a2])
    }

    fn high_pass(q: f64, fc: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * PI * fc / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();

        let b0 = (1.0 + cos) / 2.0;
        let b1 = -(1.0 + cos);
        let b2 = (1.0 + cos) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos;
        let a2 = 1.0 - alpha;

        Self::normalized([b0, b1, b2], [a0, a1, a2])
    }

    fn normalized(b: [f64; 3], a: [f64; 3]) -> Self {
        let a0 = a[0];
        Self {
            b: b.map(|v| v / a0),
            a: a.map(|v| v / a0),
        }
    }

    /// Filters `signal` in place from a zero state.
    fn filter(&self, signal: &mut [f64]) {
        let (mut z1, mut z2) = (0.0, 0.0);
        for x in signal.iter_mut() {
            let input = *x;
            let y = self.b[0] * input + z1;
            z1 = self.b[1] * input - self.a[1] * y + z2;
            z2 = self.b[2] * input - self.a[2] * y;
            *x = y;
        }
    }
}

/// K-weighted loudness meter for one sample rate.
#[derive(Debug, Clone)]
pub struct LoudnessMeter {
    sample_rate: u32,
    stages: [Biquad; 2],
}

impl LoudnessMeter {
    /// Creates a meter for `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        let rate = f64::from(sample_rate);
        Self {
            sample_rate,
            stages: [
                Biquad::high_shelf(4.0, std::f64::consts::FRAC_1_SQRT_2, 1500.0, rate),
                Biquad::high_pass(0.5, 38.0, rate),
            ],
        }
    }

    /// Sample rate the meter was built for.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Fewest samples [`integrated_loudness`](Self::integrated_loudness)
    /// accepts.
    pub fn min_samples(&self) -> usize {
        (BLOCK_SECONDS * f64::from(self.sample_rate)).ceil() as usize
    }

    /// Integrated loudness in LUFS.
    ///
    /// Returns `None` when the input is shorter than one gating block. The
    /// result is `-inf` when no block passes the gates.
    pub fn integrated_loudness(&self, samples: &[f32]) -> Option<f64> {
        let rate = f64::from(self.sample_rate);
        if self.sample_rate == 0 || (samples.len() as f64) < BLOCK_SECONDS * rate {
            return None;
        }

        let mut weighted: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
        for stage in &self.stages {
            stage.filter(&mut weighted);
        }

        let step = 1.0 - OVERLAP;
        let duration = samples.len() as f64 / rate;
        let num_blocks = ((duration - BLOCK_SECONDS) / (BLOCK_SECONDS * step)).round_ties_even()
            as usize
            + 1;

        let block_power: Vec<f64> = (0..num_blocks)
            .map(|j| {
                let j = j as f64;
                let lower = (BLOCK_SECONDS * (j * step) * rate) as usize;
                let upper = ((BLOCK_SECONDS * (j * step + 1.0) * rate) as usize).min(weighted.len());
                let sum: f64 = weighted[lower.min(upper)..upper].iter().map(|v| v * v).sum();
                sum / (BLOCK_SECONDS * rate)
            })
            .collect();

        let block_loudness: Vec<f64> = block_power.iter().map(|&z| loudness_of(z)).collect();

        let above_absolute = gated_mean(&block_power, &block_loudness, |l| l >= ABSOLUTE_GATE);
        let relative_gate = loudness_of(above_absolute) + RELATIVE_GATE;
        let gated = gated_mean(&block_power, &block_loudness, |l| {
            l > relative_gate && l > ABSOLUTE_GATE
        });

        Some(loudness_of(gated))
    }

    /// Integrated loudness, reporting `floor` for input that is too short,
    /// fully gated, or quieter than the floor.
    pub fn lufs(&self, samples: &[f32], floor: f64) -> f64 {
        match self.integrated_loudness(samples) {
            Some(loudness) if loudness > floor => loudness,
            _ => floor,
        }
    }
}

fn loudness_of(mean_square: f64) -> f64 {
    LOUDNESS_OFFSET + 10.0 * mean_square.log10()
}

/// Mean power of the blocks whose loudness passes `gate`; 0 if none do.
fn gated_mean(power: &[f64], loudness: &[f64], gate: impl Fn(f64) -> bool) -> f64 {
    let (sum, count) = power
        .iter()
        .zip(loudness)
        .filter(|(_, l)| gate(**l))
        .fold((0.0, 0usize), |(sum, count), (&z, _)| (sum + z, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
