//! Offline analysis of recorded audio.
//!
//! [`TrailingAnalyzer`] walks a recording in fixed steps. Level and flux are
//! measured on each step alone; LUFS is measured on the trailing window
//! that ends with the step, which approximates momentary loudness without
//! recomputing over the whole history.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};

use super::{dbfs, rms, MetricsCalculator};
use crate::format::downmix_to_mono;

/// Portion of the trailing window that must be available for LUFS.
const MIN_WINDOW_FILL: f64 = 0.4;

/// Metrics for one analysis step.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRow {
    /// Offset of the end of the step from the start of the recording.
    pub time: Duration,
    /// Wall-clock time of the end of the step, if the start is known.
    pub timestamp: Option<NaiveDateTime>,
    /// Root mean square of the step.
    pub rms: f64,
    /// dBFS of the step.
    pub dbfs: f64,
    /// LUFS over the trailing window.
    pub lufs: f64,
    /// Peak flux of the step.
    pub flux: f64,
    /// dBSPL of the step, when calibrated.
    pub dbspl: Option<f64>,
}

/// Peak values over a whole analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisSummary {
    /// Highest step level.
    pub max_dbfs: f64,
    /// Highest trailing-window loudness.
    pub max_lufs: f64,
    /// Highest step flux.
    pub max_flux: f64,
    /// Highest step SPL, when calibrated.
    pub max_dbspl: Option<f64>,
}

impl AnalysisSummary {
    /// Summarizes `rows`; `None` if there are none.
    pub fn from_rows(rows: &[AnalysisRow]) -> Option<Self> {
        let first = rows.first()?;
        Some(rows.iter().skip(1).fold(
            Self {
                max_dbfs: first.dbfs,
                max_lufs: first.lufs,
                max_flux: first.flux,
                max_dbspl: first.dbspl,
            },
            |acc, row| Self {
                max_dbfs: acc.max_dbfs.max(row.dbfs),
                max_lufs: acc.max_lufs.max(row.lufs),
                max_flux: acc.max_flux.max(row.flux),
                max_dbspl: match (acc.max_dbspl, row.dbspl) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                },
            },
        ))
    }
}

/// Steps over a buffer, measuring LUFS over a trailing window.
#[derive(Debug)]
pub struct TrailingAnalyzer {
    calculator: MetricsCalculator,
    step: Duration,
    window: Duration,
}

impl TrailingAnalyzer {
    /// Creates an analyzer with a 100 ms step and a 1 s trailing window.
    pub fn new(calculator: MetricsCalculator) -> Self {
        Self {
            calculator,
            step: Duration::from_millis(100),
            window: Duration::from_secs(1),
        }
    }

    /// Sets the step length.
    #[must_use]
    pub fn step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Sets the trailing LUFS window.
    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Analyzes `samples`. Samples after the last whole step are ignored.
    pub fn analyze(&self, samples: &[f32], start: Option<NaiveDateTime>) -> Vec<AnalysisRow> {
        let rate = f64::from(self.calculator.sample_rate());
        let step_len = ((self.step.as_secs_f64() * rate) as usize).max(1);
        let window_len = (self.window.as_secs_f64() * rate) as usize;
        let min_window = window_len as f64 * MIN_WINDOW_FILL;
        let settings = *self.calculator.settings();

        samples
            .chunks_exact(step_len)
            .enumerate()
            .map(|(i, chunk)| {
                let end = (i + 1) * step_len;
                let time = Duration::from_secs_f64(end as f64 / rate);

                let trailing = &samples[end.saturating_sub(window_len)..end];
                let lufs = if trailing.len() as f64 >= min_window {
                    self.calculator.lufs(trailing)
                } else {
                    settings.lufs_floor
                };

                let rms = rms(chunk);
                let dbfs = dbfs(rms, settings.dbfs_floor);
                AnalysisRow {
                    time,
                    timestamp: start.and_then(|s| {
                        TimeDelta::from_std(time).ok().and_then(|d| s.checked_add_signed(d))
                    }),
                    rms,
                    dbfs,
                    lufs,
                    flux: self.calculator.flux(chunk),
                    dbspl: self.calculator.dbspl(dbfs),
                }
            })
            .collect()
    }
}

/// Reads a WAV file as mono `f32`, averaging channels.
///
/// Returns the sample rate and the samples.
pub fn read_wav_mono(path: impl AsRef<Path>) -> Result<(u32, Vec<f32>), hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 2f32.powi(i32::from(spec.bits_per_sample) - 1);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok((spec.sample_rate, downmix_to_mono(&interleaved, channels)))
}

/// Finds a `YYYY-MM-DD HH:MM:SS` style timestamp in a file name.
///
/// The date/time separator may be a space, `T` or `_`, and the time
/// separators `:`, `.` or `-`.
pub fn parse_start_time(file_name: &str) -> Option<NaiveDateTime> {
    const LEN: usize = 19;
    let bytes = file_name.as_bytes();
    if bytes.len() < LEN {
        return None;
    }
    (0..=bytes.len() - LEN).find_map(|i| {
        let candidate = file_name.get(i..i + LEN)?;
        let normalized: String = candidate
            .char_indices()
            .map(|(pos, c)| match (pos, c) {
                (10, ' ' | 'T' | '_') => ' ',
                (13 | 16, ':' | '.' | '-') => ':',
                _ => c,
            })
            .collect();
        NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S").ok()
    })
}

/// Writes rows as CSV with a header line.
pub fn write_csv<W: Write>(mut out: W, rows: &[AnalysisRow]) -> std::io::Result<()> {
    writeln!(out, "time_sec,timestamp,rms,dbfs,lufs,flux,dbspl")?;
    for row in rows {
        let timestamp = row
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_default();
        let dbspl = row.dbspl.map(|v| format!("{v:.2}")).unwrap_or_default();
        writeln!(
            out,
            "{:.3},{},{:.6},{:.2},{:.2},{:.2},{}",
            row.time.as_secs_f64(),
            timestamp,
            row.rms,
            row.dbfs,
            row.lufs,
            row.flux,
            dbspl
        )?;
    }
    Ok(())
}
