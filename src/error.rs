//! Error types for spl-meter.
//!
//! Errors are split by how far they are allowed to travel:
//! - **Fatal errors** ([`MeterError`]): stop the meter from starting, or end a
//!   running session (capture retries exhausted)
//! - **Recoverable errors** ([`HardwareError`], [`TransformError`],
//!   [`SinkError`], [`CacheError`]): logged, counted and surfaced via
//!   [`EventCallback`](crate::EventCallback); the pipeline keeps running

use std::path::PathBuf;

/// Fatal errors that prevent the meter from starting or keep it from running.
#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    /// The requested input device was not found.
    #[error("input device not found: {index}")]
    DeviceNotFound {
        /// Index of the device that wasn't found.
        index: usize,
    },

    /// No default input device is configured on this system.
    #[error("no default input device configured")]
    NoDefaultDevice,

    /// The calibration file could not be used.
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A sink failed during initialization.
    #[error("sink '{sink_name}' failed to start: {reason}")]
    SinkStartFailed {
        /// Name of the sink that failed.
        sink_name: String,
        /// Why the sink failed to start.
        reason: String,
    },

    /// Capture gave up after too many consecutive hardware failures.
    #[error("audio capture failed after {attempts} consecutive attempts")]
    CaptureFailed {
        /// Number of failed attempts.
        attempts: u32,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),
}

/// Errors raised while reading a calibration file.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// The calibration file could not be read.
    #[error("calibration file error: {path}: {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No frequency/gain rows were found.
    #[error("no frequency/gain rows found in calibration data")]
    NoData,

    /// Frequencies must be strictly increasing.
    #[error("calibration frequencies must be strictly increasing (line {line}: {frequency} Hz)")]
    NotIncreasing {
        /// 1-based line number of the offending row.
        line: usize,
        /// The offending frequency.
        frequency: f64,
    },

    /// Every calibration point lies outside the band the filter can represent.
    #[error("no calibration points inside (0, {nyquist}) Hz")]
    NoPointsInBand {
        /// Nyquist frequency of the target sample rate.
        nyquist: f64,
    },

    /// The tap count cannot produce a linear-phase filter with non-zero gain
    /// at Nyquist.
    #[error("cannot design a {taps}-coefficient filter: need an odd count of at least 3")]
    InvalidTapCount {
        /// Number of coefficients that was requested from the design.
        taps: usize,
    },

    /// No `Sens Factor` line was present.
    #[error("'Sens Factor' line not found in calibration data")]
    SensitivityMissing,

    /// The `Sens Factor` line could not be parsed.
    #[error("could not parse 'Sens Factor' line {line}: '{text}'")]
    SensitivityMalformed {
        /// 1-based line number.
        line: usize,
        /// The raw line.
        text: String,
    },
}

/// A recoverable failure of the audio hardware stream.
///
/// The capture scheduler reacts by backing off and reconnecting.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HardwareError {
    /// The stream could not be opened.
    #[error("failed to open input stream: {0}")]
    Open(String),

    /// The stream failed while reading.
    #[error("input stream failed: {0}")]
    Stream(String),

    /// The device delivered no audio within the read timeout.
    #[error("input stream stalled for {waited_ms}ms")]
    Stalled {
        /// How long the read waited.
        waited_ms: u64,
    },

    /// The device went away.
    #[error("input device disconnected")]
    Disconnected,
}

/// A failure inside the transformer chain. The affected frame is dropped.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The frame's sample rate does not match what the transformer expects.
    #[error("sample rate mismatch: expected {expected}Hz, got {actual}Hz")]
    SampleRateMismatch {
        /// Expected sample rate.
        expected: u32,
        /// Actual sample rate.
        actual: u32,
    },

    /// Custom error for user-implemented transformers.
    #[error("{0}")]
    Custom(String),
}

impl TransformError {
    /// Creates a custom transform error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Errors that can occur within a [`Sink`](crate::Sink) implementation.
///
/// Sink errors are isolated: the dispatcher logs them, emits a
/// [`MeterEvent::SinkError`](crate::MeterEvent::SinkError) and keeps
/// delivering to the other sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

/// Filter cache I/O failures. Never fatal: the filter is redesigned instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing the cache artifact failed.
    #[error("filter cache error: {path}: {source}")]
    Io {
        /// Path to the cache artifact.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The artifact's size is not a whole number of coefficients.
    #[error("filter cache artifact is corrupt: {path} ({len} bytes)")]
    Corrupt {
        /// Path to the cache artifact.
        path: PathBuf,
        /// Size of the artifact in bytes.
        len: usize,
    },
}
