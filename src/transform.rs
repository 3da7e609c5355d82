//! Transformer trait for in-line frame processing.

use crate::{AudioFrame, TransformError};

/// A synchronous processing step applied to every frame before the sinks.
///
/// Transformers run in the order they were registered, on the dispatch task,
/// one frame at a time. They take `&mut self` so they can keep state between
/// frames (filter delay lines, accumulators) without locking.
///
/// An error drops the frame: no sink will see it.
///
/// # Example
///
/// ```
/// use spl_meter::{AudioFrame, TransformError, Transformer};
///
/// struct Gain(f32);
///
/// impl Transformer for Gain {
///     fn name(&self) -> &str {
///         "gain"
///     }
///
///     fn process(&mut self, frame: AudioFrame) -> Result<AudioFrame, TransformError> {
///         let scaled = frame.samples.iter().map(|s| s * self.0).collect();
///         Ok(frame.with_samples(scaled))
///     }
/// }
/// ```
pub trait Transformer: Send {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Transforms one frame.
    fn process(&mut self, frame: AudioFrame) -> Result<AudioFrame, TransformError>;
}
