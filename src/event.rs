//! Runtime events for monitoring pipeline health.
//!
//! Events are non-fatal notifications. The pipeline keeps running after an
//! event is emitted - they're for logging/metrics, not error handling. The
//! one exception is [`MeterEvent::CaptureFailed`], which is emitted just
//! before the session shuts itself down.

use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::CaptureState;

/// Runtime events emitted by the capture and dispatch tasks.
///
/// # Example
///
/// ```
/// use spl_meter::MeterEvent;
///
/// fn handle_event(event: MeterEvent) {
///     match event {
///         MeterEvent::FrameDropped { total_dropped, .. } => {
///             eprintln!("dispatcher is behind, {} frames dropped", total_dropped);
///         }
///         MeterEvent::SinkError { sink_name, error } => {
///             eprintln!("Sink '{}' error: {}", sink_name, error);
///         }
///         other => eprintln!("{:?}", other),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum MeterEvent {
    /// The capture scheduler moved to a new state.
    CaptureStateChanged {
        /// The state just entered.
        state: CaptureState,
    },

    /// The hardware reported an input overflow. Capture continues.
    HardwareOverflow {
        /// Overflows seen so far in this session.
        total: u64,
    },

    /// The capture→dispatch channel was full and a frame was discarded.
    ///
    /// This happens when the transformer chain or sinks are slower than
    /// real-time. Consider a larger `channel_capacity`.
    FrameDropped {
        /// Capture timestamp of the dropped frame.
        timestamp: Duration,
        /// Frames dropped so far in this session.
        total_dropped: u64,
    },

    /// Opening or reading the input stream failed; capture will back off and
    /// reconnect.
    StreamError {
        /// Consecutive failure count, starting at 1.
        attempt: u32,
        /// Attempts allowed before giving up.
        max_retries: u32,
        /// Description of the hardware error.
        error: String,
    },

    /// Capture exhausted its retries. The session is shutting down.
    CaptureFailed {
        /// Number of consecutive failed attempts.
        attempts: u32,
    },

    /// A transformer rejected a frame. That frame was not delivered.
    TransformError {
        /// Name of the transformer that failed.
        transformer: String,
        /// Description of the error.
        error: String,
    },

    /// A sink failed to handle a frame. Other sinks still received it.
    SinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
    },
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via [`MeterBuilder::on_event()`] to receive
/// notifications about dropped frames, hardware trouble and sink errors.
///
/// [`MeterBuilder::on_event()`]: crate::MeterBuilder::on_event
pub type EventCallback = Arc<dyn Fn(MeterEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use spl_meter::{event_callback, MeterEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(MeterEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Invokes the callback if one is registered.
pub(crate) fn emit(callback: Option<&EventCallback>, event: MeterEvent) {
    if let Some(cb) = callback {
        cb(event);
    }
}
