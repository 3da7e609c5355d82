//! # spl-meter
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Calibrated real-time sound level metering.
//!
//! `spl-meter` captures a microphone via CPAL, corrects its frequency
//! response with a FIR filter designed from the microphone's calibration
//! file, and reports RMS, dBFS, LUFS, spectral flux and (when calibrated)
//! dBSPL at a fixed interval. Corrected audio can also be recorded to
//! rotating WAV segments and analyzed offline.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spl_meter::{Meter, MeterConfig, RecorderSink};
//! use std::time::Duration;
//!
//! let config = MeterConfig {
//!     calibration_file: Some("umik-1/7175488.txt".into()),
//!     ..Default::default()
//! };
//!
//! let session = Meter::builder()
//!     .config(config)
//!     .metrics()                                     // one snapshot per 3s
//!     .add_sink(RecorderSink::new("recordings", Duration::from_secs(3600)))
//!     .on_event(|e| tracing::warn!(?e, "meter event"))
//!     .start()
//!     .await?;
//!
//! tokio::signal::ctrl_c().await?;
//! session.stop().await?;
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Capture thread**: owns the hardware stream, reconnects with backoff
//!   and never blocks on downstream work
//! - **Bounded channel**: frames that don't fit are dropped and counted
//! - **Tokio task**: applies the transformer chain (correction filter first)
//!   and fans every frame out to all sinks
//!
//! A shared [`CancelSignal`] stops both sides.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
pub mod calibration;
mod cancel;
mod config;
mod error;
mod event;
pub mod format;
mod frame;
pub mod metrics;
pub mod pipeline;
mod session;
mod sink;
pub mod source;
mod transform;

pub use builder::{Meter, MeterBuilder};
pub use cancel::CancelSignal;
pub use config::{
    MeterConfig, LUFS_WINDOW_SECONDS, MIN_BUFFER_SECONDS, NOMINAL_SENSITIVITY_DBFS,
    REFERENCE_DBSPL,
};
pub use error::{
    CacheError, CalibrationError, HardwareError, MeterError, SinkError, TransformError,
};
pub use event::{event_callback, EventCallback, MeterEvent};
pub use frame::AudioFrame;
pub use pipeline::{CaptureOutcome, CaptureState, DispatchReport};
pub use session::{MeterSession, SessionStats};
pub use sink::{ChannelSink, MetricsSink, RecorderSink, Sink};
pub use source::{list_input_devices, DeviceDescriptor};
pub use transform::Transformer;
