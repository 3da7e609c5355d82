//! Capture and dispatch pipeline.
//!
//! ```text
//! Hardware → CaptureScheduler (OS thread) → bounded mpsc → Dispatcher (tokio task)
//!                                                           → transformers → sinks
//! ```
//!
//! - **CaptureScheduler**: Owns the input stream, reconnects after hardware
//!   errors, never blocks on the dispatcher (full channel drops the frame)
//! - **Dispatcher**: Runs the transformer chain and fans the result out to
//!   every sink, isolating sink failures
//!
//! The two sides share only the channel, a [`CancelSignal`](crate::CancelSignal)
//! and the session counters.

mod capture;
mod dispatcher;

pub use capture::{CaptureOutcome, CaptureScheduler, CaptureState, RetryPolicy};
pub use dispatcher::{DispatchReport, Dispatcher};
