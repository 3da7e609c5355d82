//! Metering session management.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::task::JoinHandle;

use crate::pipeline::{CaptureOutcome, CaptureState};
use crate::source::DeviceDescriptor;
use crate::{CancelSignal, MeterError};

/// Statistics about a metering session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames read from the hardware.
    pub frames_captured: u64,
    /// Frames that went through the transformer chain to the sinks.
    pub frames_dispatched: u64,
    /// Frames discarded because the dispatch channel was full.
    pub frames_dropped: u64,
    /// Overflows reported by the hardware.
    pub hardware_overflows: u64,
    /// Frames a transformer rejected.
    pub transform_failures: u64,
    /// Individual sink failures.
    pub sink_failures: u64,
    /// Failed open or read attempts, over the whole session.
    pub reconnect_attempts: u64,
    /// Where the capture scheduler currently is.
    pub capture_state: CaptureState,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            frames_captured: 0,
            frames_dispatched: 0,
            frames_dropped: 0,
            hardware_overflows: 0,
            transform_failures: 0,
            sink_failures: 0,
            reconnect_attempts: 0,
            capture_state: CaptureState::Connecting,
        }
    }
}

/// Internal state shared between the session handle, the capture thread and
/// the dispatch task.
pub(crate) struct SessionState {
    pub frames_captured: AtomicU64,
    pub frames_dispatched: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub hardware_overflows: AtomicU64,
    pub transform_failures: AtomicU64,
    pub sink_failures: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    pub consecutive_failures: AtomicU32,
    capture_state: AtomicU8,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            frames_dispatched: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            hardware_overflows: AtomicU64::new(0),
            transform_failures: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            capture_state: AtomicU8::new(CaptureState::Connecting.to_u8()),
        }
    }

    pub fn capture_state(&self) -> CaptureState {
        CaptureState::from_u8(self.capture_state.load(Ordering::SeqCst))
    }

    pub fn set_capture_state(&self, state: CaptureState) {
        self.capture_state.store(state.to_u8(), Ordering::SeqCst);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_captured: self.frames_captured.load(Ordering::SeqCst),
            frames_dispatched: self.frames_dispatched.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
            hardware_overflows: self.hardware_overflows.load(Ordering::SeqCst),
            transform_failures: self.transform_failures.load(Ordering::SeqCst),
            sink_failures: self.sink_failures.load(Ordering::SeqCst),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            capture_state: self.capture_state(),
        }
    }
}

/// Handle to a running metering session.
///
/// The `MeterSession` is returned by [`MeterBuilder::start()`]. Capture runs
/// on its own thread and dispatch on a tokio task until the session is
/// cancelled or capture gives up.
///
/// # Lifecycle
///
/// 1. Created by [`MeterBuilder::start()`]
/// 2. Capture and dispatch run in the background
/// 3. Call [`cancel()`](MeterSession::cancel) from anywhere (e.g. a ctrl-c
///    handler), then [`wait()`](MeterSession::wait); or call
///    [`stop()`](MeterSession::stop) which does both
/// 4. Dropping the `MeterSession` also cancels (but prefer explicit `stop()`)
///
/// # Example
///
/// ```ignore
/// let session = Meter::builder()
///     .config(config)
///     .add_sink(MetricsSink::new(calculator, Duration::from_secs(3)))
///     .start()
///     .await?;
///
/// tokio::signal::ctrl_c().await?;
/// let stats = session.stop().await?;
/// ```
///
/// [`MeterBuilder::start()`]: crate::MeterBuilder::start
pub struct MeterSession {
    state: Arc<SessionState>,
    cancel: CancelSignal,
    device: DeviceDescriptor,
    sample_rate: u32,
    dispatch_handle: Option<JoinHandle<()>>,
    capture_handle: Option<thread::JoinHandle<CaptureOutcome>>,
}

impl MeterSession {
    pub(crate) fn new(
        state: Arc<SessionState>,
        cancel: CancelSignal,
        device: DeviceDescriptor,
        sample_rate: u32,
        dispatch_handle: JoinHandle<()>,
        capture_handle: thread::JoinHandle<CaptureOutcome>,
    ) -> Self {
        Self {
            state,
            cancel,
            device,
            sample_rate,
            dispatch_handle: Some(dispatch_handle),
            capture_handle: Some(capture_handle),
        }
    }

    /// Returns `true` until the session is cancelled or capture gives up.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Requests shutdown. Capture and dispatch notice within one read or
    /// one pop timeout.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clone of the session's cancellation signal.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Returns current session statistics.
    pub fn stats(&self) -> SessionStats {
        self.state.stats()
    }

    /// Current state of the capture scheduler.
    pub fn capture_state(&self) -> CaptureState {
        self.state.capture_state()
    }

    /// The device being captured.
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Sample rate of the captured frames.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Cancels the session and waits for it to wind down.
    ///
    /// # Errors
    ///
    /// See [`wait()`](Self::wait).
    pub async fn stop(self) -> Result<SessionStats, MeterError> {
        self.cancel();
        self.wait().await
    }

    /// Waits until the session ends by itself or through
    /// [`cancel()`](Self::cancel), after all sinks were stopped.
    ///
    /// # Errors
    ///
    /// Returns `CaptureFailed` when capture exhausted its retries.
    pub async fn wait(mut self) -> Result<SessionStats, MeterError> {
        if let Some(handle) = self.dispatch_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Dispatch task failed: {}", e);
            }
        }
        // The dispatcher only returns once cancelled or once capture dropped
        // its sender, so this join is short.
        self.cancel.cancel();

        let outcome = match self.capture_handle.take() {
            Some(handle) => tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| MeterError::BackendError(format!("capture join failed: {e}")))?
                .map_err(|_| MeterError::BackendError("capture thread panicked".to_string()))?,
            None => CaptureOutcome::Stopped,
        };

        let stats = self.state.stats();
        tracing::info!(?stats, "Session ended");
        match outcome {
            CaptureOutcome::Stopped => Ok(stats),
            CaptureOutcome::Failed { attempts } => Err(MeterError::CaptureFailed { attempts }),
        }
    }
}

impl Drop for MeterSession {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            // Session dropped without explicit stop() - background tasks wind
            // down on their own
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_new() {
        let state = SessionState::new();
        assert_eq!(state.frames_captured.load(Ordering::SeqCst), 0);
        assert_eq!(state.capture_state(), CaptureState::Connecting);
    }

    #[test]
    fn test_session_stats_default() {
        let stats = SessionStats::default();
        assert_eq!(stats.frames_dispatched, 0);
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(stats.capture_state, CaptureState::Connecting);
    }

    #[test]
    fn test_stats_snapshot_reflects_counters() {
        let state = SessionState::new();
        state.frames_captured.fetch_add(3, Ordering::SeqCst);
        state.sink_failures.fetch_add(1, Ordering::SeqCst);
        state.set_capture_state(CaptureState::Backoff);

        let stats = state.stats();
        assert_eq!(stats.frames_captured, 3);
        assert_eq!(stats.sink_failures, 1);
        assert_eq!(stats.capture_state, CaptureState::Backoff);
    }
}
