//! Sink trait and implementations for frame destinations.
//!
//! A [`Sink`] is any destination that receives corrected frames. The crate
//! provides three built-in sinks:
//!
//! - [`MetricsSink`]: Computes level and loudness metrics and logs them
//! - [`RecorderSink`]: Writes frames to rotating WAV files
//! - [`ChannelSink`]: Sends frames to a tokio mpsc channel
//!
//! You can implement the [`Sink`] trait for custom destinations like
//! network endpoints or displays.

mod channel;
mod metrics;
mod recorder;

pub use channel::ChannelSink;
pub use metrics::MetricsSink;
pub use recorder::RecorderSink;

use crate::{AudioFrame, SinkError};
use async_trait::async_trait;

/// A destination for corrected audio frames.
///
/// Sinks receive frames from the dispatcher after the transformer chain.
///
/// # Implementation Notes
///
/// - Methods take `&mut self`; the dispatcher owns its sinks and calls them
///   one at a time, so no locking is needed
/// - All methods are async and run on the tokio runtime
/// - `on_start` is called before any audio flows; open resources here
/// - `on_stop` is called during shutdown; close resources here
///
/// # Example
///
/// ```
/// use spl_meter::{AudioFrame, Sink, SinkError};
/// use async_trait::async_trait;
///
/// struct PrintSink {
///     frames: usize,
/// }
///
/// #[async_trait]
/// impl Sink for PrintSink {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     async fn handle(&mut self, frame: &AudioFrame) -> Result<(), SinkError> {
///         self.frames += 1;
///         println!("frame {} at {:?}: {} samples", self.frames, frame.timestamp, frame.len());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Called once before streaming begins.
    ///
    /// Errors here are fatal and will prevent the session from starting.
    ///
    /// Default implementation does nothing.
    async fn on_start(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Handles one frame.
    ///
    /// Errors are recoverable - the dispatcher will emit a
    /// [`MeterEvent::SinkError`] and the other sinks still get the frame.
    ///
    /// [`MeterEvent::SinkError`]: crate::MeterEvent::SinkError
    async fn handle(&mut self, frame: &AudioFrame) -> Result<(), SinkError>;

    /// Called during shutdown, even if errors occurred during streaming.
    ///
    /// Default implementation does nothing.
    async fn on_stop(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct CountingSink {
        name: String,
        count: usize,
        started: bool,
        stopped: bool,
    }

    impl CountingSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                count: 0,
                started: false,
                stopped: false,
            }
        }
    }

    #[async_trait]
    impl Sink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_start(&mut self) -> Result<(), SinkError> {
            self.started = true;
            Ok(())
        }

        async fn handle(&mut self, _frame: &AudioFrame) -> Result<(), SinkError> {
            self.count += 1;
            Ok(())
        }

        async fn on_stop(&mut self) -> Result<(), SinkError> {
            self.stopped = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_lifecycle() {
        let mut sink = CountingSink::new("test");

        sink.on_start().await.unwrap();

        let frame = AudioFrame::new(vec![0.0; 100], Duration::ZERO, 48000);
        sink.handle(&frame).await.unwrap();
        sink.handle(&frame).await.unwrap();

        assert_eq!(sink.count, 2);
        sink.on_stop().await.unwrap();
        assert!(sink.started && sink.stopped);
    }

    #[tokio::test]
    async fn test_sink_name() {
        let sink = CountingSink::new("my-sink");
        assert_eq!(sink.name(), "my-sink");
    }

    #[test]
    fn test_boxed_sink_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn Sink>>();
    }
}
