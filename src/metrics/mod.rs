//! Level and loudness metrics.
//!
//! | Metric | Definition |
//! |---|---|
//! | rms | `sqrt(mean(x²))` |
//! | dBFS | `20·log10(rms)`, clamped to a floor on silence |
//! | flux | peak onset strength, see [`SpectralFlux`] |
//! | LUFS | integrated loudness, see [`LoudnessMeter`] |
//! | dBSPL | `dBFS - sensitivity + reference`, when calibrated |
//!
//! [`MetricsCalculator`] computes a [`MetricsSnapshot`] for one block of
//! samples; [`MetricsAggregator`] decides which blocks to measure in real
//! time and [`TrailingAnalyzer`] does the same for recorded audio.

mod aggregator;
mod flux;
mod level;
mod loudness;
mod offline;

pub use aggregator::MetricsAggregator;
pub use flux::SpectralFlux;
pub use level::{dbfs, rms};
pub use loudness::LoudnessMeter;
pub use offline::{
    parse_start_time, read_wav_mono, write_csv, AnalysisRow, AnalysisSummary, TrailingAnalyzer,
};

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::calibration::Sensitivity;
use crate::MeterConfig;

/// Metrics for one measured block of audio.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Wall-clock time the block was measured.
    pub measured_at: DateTime<Local>,
    /// Amount of audio measured.
    pub interval: Duration,
    /// Root mean square amplitude.
    pub rms: f64,
    /// Level relative to full scale.
    pub dbfs: f64,
    /// Peak spectral flux.
    pub flux: f64,
    /// Integrated loudness.
    pub lufs: f64,
    /// Sound pressure level, when a sensitivity is known.
    pub dbspl: Option<f64>,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] interval={:.2}s rms={:.4} dBFS={:.2} LUFS={:.2} flux={:.2}",
            self.measured_at.format("%Y-%m-%d %H:%M:%S"),
            self.interval.as_secs_f64(),
            self.rms,
            self.dbfs,
            self.lufs,
            self.flux,
        )?;
        if let Some(spl) = self.dbspl {
            write!(f, " dBSPL={spl:.2}")?;
        }
        Ok(())
    }
}

/// Floors and calibration used when computing metrics.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSettings {
    /// Lowest reported dBFS.
    pub dbfs_floor: f64,
    /// LUFS reported for unmeasurable input.
    pub lufs_floor: f64,
    /// Microphone sensitivity; enables dBSPL.
    pub sensitivity: Option<Sensitivity>,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            dbfs_floor: -120.0,
            lufs_floor: -70.0,
            sensitivity: None,
        }
    }
}

impl MetricsSettings {
    /// Takes the floors from `config`.
    pub fn from_config(config: &MeterConfig, sensitivity: Option<Sensitivity>) -> Self {
        Self {
            dbfs_floor: config.dbfs_floor,
            lufs_floor: config.lufs_floor,
            sensitivity,
        }
    }
}

/// Computes every metric for a block at one sample rate.
#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    sample_rate: u32,
    settings: MetricsSettings,
    loudness: LoudnessMeter,
    flux: SpectralFlux,
}

impl MetricsCalculator {
    /// Creates a calculator for `sample_rate`.
    pub fn new(sample_rate: u32, settings: MetricsSettings) -> Self {
        Self {
            sample_rate,
            settings,
            loudness: LoudnessMeter::new(sample_rate),
            flux: SpectralFlux::new(sample_rate),
        }
    }

    /// Sample rate the calculator was built for.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The floors and sensitivity in use.
    pub fn settings(&self) -> &MetricsSettings {
        &self.settings
    }

    /// Measures `samples` as one block.
    pub fn measure(&self, samples: &[f32], measured_at: DateTime<Local>) -> MetricsSnapshot {
        let rms = rms(samples);
        let dbfs = dbfs(rms, self.settings.dbfs_floor);
        MetricsSnapshot {
            measured_at,
            interval: Duration::from_secs_f64(samples.len() as f64 / f64::from(self.sample_rate)),
            rms,
            dbfs,
            flux: self.flux.peak(samples),
            lufs: self.lufs(samples),
            dbspl: self.dbspl(dbfs),
        }
    }

    /// LUFS of `samples`, floored.
    pub fn lufs(&self, samples: &[f32]) -> f64 {
        self.loudness.lufs(samples, self.settings.lufs_floor)
    }

    /// Peak flux of `samples`.
    pub fn flux(&self, samples: &[f32]) -> f64 {
        self.flux.peak(samples)
    }

    /// dBSPL for a dBFS level, if calibrated.
    pub fn dbspl(&self, dbfs: f64) -> Option<f64> {
        self.settings.sensitivity.map(|s| s.dbspl(dbfs))
    }
}
