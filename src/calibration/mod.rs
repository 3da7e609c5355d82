//! Microphone calibration: response curves, correction filters, sensitivity.
//!
//! A calibration file (e.g. from miniDSP for a UMIK-1) lists the measured
//! frequency response of one microphone and usually its sensitivity:
//!
//! ```text
//! "Sens Factor =-1.23dB, SERNO: 7000000"
//! 10      -5.0
//! 20      -2.5
//! 1000     0.0
//! 10000    1.5
//! 20000    2.0
//! ```
//!
//! [`CorrectionFilter::load_or_design`] turns the curve into an inverse FIR
//! filter (cached through a [`FilterCache`]) and [`Sensitivity`] maps the
//! `Sens Factor` line to the dBFS level that corresponds to 94 dBSPL.

mod cache;
mod curve;
mod design;
mod filter;
mod sensitivity;

pub use cache::{FileFilterCache, FilterCache, FilterKey, NoopFilterCache};
pub use curve::CalibrationCurve;
pub use design::{design_correction, firwin2};
pub use filter::{CorrectionFilter, FilterSource};
pub use sensitivity::Sensitivity;
