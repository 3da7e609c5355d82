//! Configuration for a metering session.

use std::path::PathBuf;
use std::time::Duration;

use crate::MeterError;

/// Length of the LUFS aggregation window; buffer sizes are a multiple of it.
pub const LUFS_WINDOW_SECONDS: f64 = 3.0;

/// Smallest allowed capture buffer.
pub const MIN_BUFFER_SECONDS: f64 = 3.0;

/// Nominal sensitivity of a UMIK-1 class microphone before the per-unit factor.
pub const NOMINAL_SENSITIVITY_DBFS: f64 = -18.0;

/// Reference sound pressure level the sensitivity is quoted against.
pub const REFERENCE_DBSPL: f64 = 94.0;

/// Configuration for a metering session.
///
/// Use [`MeterConfig::default()`] for sensible defaults, or customize as needed.
/// Call [`validate()`](Self::validate) before handing the config to the core;
/// [`MeterBuilder::start()`](crate::MeterBuilder::start) does this for you.
///
/// # Example
///
/// ```
/// use spl_meter::MeterConfig;
/// use std::time::Duration;
///
/// let config = MeterConfig {
///     buffer_seconds: 4.0,
///     metrics_interval: Duration::ZERO,
///     ..Default::default()
/// };
/// assert_eq!(config.effective_buffer_seconds(), 6.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Input device index. `None` selects the system default.
    pub device: Option<usize>,

    /// Requested sample rate in Hz.
    ///
    /// When a calibration file is configured the device's native rate wins.
    /// Default: 48000
    pub sample_rate: u32,

    /// Seconds of audio per captured frame.
    ///
    /// Clamped to at least [`MIN_BUFFER_SECONDS`] and rounded up to a
    /// multiple of [`LUFS_WINDOW_SECONDS`]; see
    /// [`effective_buffer_seconds()`](Self::effective_buffer_seconds).
    /// Default: 6.0
    pub buffer_seconds: f64,

    /// Microphone calibration file. Enables FIR correction and dBSPL.
    pub calibration_file: Option<PathBuf>,

    /// Requested FIR tap count.
    ///
    /// Default: 1024
    pub num_taps: usize,

    /// Ignore any cached filter and redesign it.
    pub force_filter_rebuild: bool,

    /// Metrics aggregation interval. `Duration::ZERO` emits per frame.
    ///
    /// Default: 3s
    pub metrics_interval: Duration,

    /// Lowest reported dBFS value (silence).
    ///
    /// Default: -120.0
    pub dbfs_floor: f64,

    /// LUFS reported for inputs too short or too quiet to measure.
    ///
    /// Default: -70.0
    pub lufs_floor: f64,

    /// Nominal microphone sensitivity added to the file's `Sens Factor`.
    ///
    /// Default: -18.0
    pub nominal_sensitivity_dbfs: f64,

    /// Reference level the sensitivity is quoted against.
    ///
    /// Default: 94.0
    pub reference_dbspl: f64,

    /// Capacity of the capture→dispatch channel, in frames.
    ///
    /// When full, new frames are dropped.
    /// Default: 32
    pub channel_capacity: usize,

    /// Consecutive hardware failures before capture gives up.
    ///
    /// Default: 10
    pub max_retries: u32,

    /// Wait between reconnect attempts.
    ///
    /// Default: 5s
    pub reconnect_delay: Duration,

    /// How long the dispatcher waits for a frame before re-checking
    /// cancellation.
    ///
    /// Default: 1s
    pub pop_timeout: Duration,

    /// Recorder segment length.
    ///
    /// Default: 1 hour
    pub rotation: Duration,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48000,
            buffer_seconds: 6.0,
            calibration_file: None,
            num_taps: 1024,
            force_filter_rebuild: false,
            metrics_interval: Duration::from_secs(3),
            dbfs_floor: -120.0,
            lufs_floor: -70.0,
            nominal_sensitivity_dbfs: NOMINAL_SENSITIVITY_DBFS,
            reference_dbspl: REFERENCE_DBSPL,
            channel_capacity: 32,
            max_retries: 10,
            reconnect_delay: Duration::from_secs(5),
            pop_timeout: Duration::from_secs(1),
            rotation: Duration::from_secs(3600),
        }
    }
}

impl MeterConfig {
    /// Buffer length actually used for capture.
    #[must_use]
    pub fn effective_buffer_seconds(&self) -> f64 {
        if self.buffer_seconds < MIN_BUFFER_SECONDS {
            return MIN_BUFFER_SECONDS;
        }
        (self.buffer_seconds / LUFS_WINDOW_SECONDS).ceil() * LUFS_WINDOW_SECONDS
    }

    /// Samples per captured frame at the given rate.
    #[must_use]
    pub fn block_size(&self, sample_rate: u32) -> usize {
        (f64::from(sample_rate) * self.effective_buffer_seconds()).round() as usize
    }

    /// Checks the values the core depends on.
    pub fn validate(&self) -> Result<(), MeterError> {
        if self.sample_rate == 0 {
            return Err(MeterError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        if !self.buffer_seconds.is_finite() || self.buffer_seconds <= 0.0 {
            return Err(MeterError::InvalidConfig(format!(
                "buffer seconds must be positive, got {}",
                self.buffer_seconds
            )));
        }
        // One fewer coefficient than requested is designed, and that length
        // must be odd.
        if self.num_taps < 4 || self.num_taps % 2 != 0 {
            return Err(MeterError::InvalidConfig(format!(
                "tap count must be even and at least 4, got {}",
                self.num_taps
            )));
        }
        if self.channel_capacity == 0 {
            return Err(MeterError::InvalidConfig(
                "channel capacity must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(MeterError::InvalidConfig(
                "max retries must be at least 1".to_string(),
            ));
        }
        if self.pop_timeout.is_zero() {
            return Err(MeterError::InvalidConfig(
                "pop timeout must be non-zero".to_string(),
            ));
        }
        if self.dbfs_floor >= 0.0 {
            return Err(MeterError::InvalidConfig(format!(
                "dBFS floor must be negative, got {}",
                self.dbfs_floor
            )));
        }
        Ok(())
    }

    /// Checks the device choice against the system default.
    ///
    /// A non-default device is only meaningful with its calibration file.
    pub fn validate_device(&self, default_index: Option<usize>) -> Result<(), MeterError> {
        match self.device {
            Some(index) if Some(index) != default_index && self.calibration_file.is_none() => {
                Err(MeterError::InvalidConfig(format!(
                    "a calibration file is required when selecting non-default device {index}"
                )))
            }
            _ => Ok(()),
        }
    }
}
