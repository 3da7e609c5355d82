//! Sample conversion utilities.
//!
//! - Sample format conversion (f32 → i16) for 16-bit WAV output
//! - Channel conversion (interleaved → mono)

mod convert;

pub use convert::{downmix_to_mono, f32_slice_to_i16, f32_to_i16};
