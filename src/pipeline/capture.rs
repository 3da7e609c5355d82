//! Capture scheduler - owns the hardware stream and feeds the dispatcher.
//!
//! Runs on a dedicated OS thread because hardware streams are not `Send`.
//! The scheduler:
//! - Opens the input stream and reads fixed-size blocks from it
//! - Timestamps each block and pushes it into the bounded frame channel
//!   without ever waiting on the consumer
//! - Backs off and reconnects after hardware errors, giving up after
//!   `max_retries` consecutive failures

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::event::{emit, EventCallback};
use crate::session::SessionState;
use crate::source::{AudioBackend, DeviceDescriptor, InputStream, StreamParams};
use crate::{AudioFrame, CancelSignal, HardwareError, MeterEvent};

/// Lifecycle of the capture scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Opening the input stream.
    Connecting,
    /// Reading blocks from an open stream.
    Capturing,
    /// Waiting before the next reconnect attempt.
    Backoff,
    /// Gave up after too many consecutive failures.
    Failed,
    /// Cancelled.
    Stopped,
}

impl CaptureState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Capturing => 1,
            Self::Backoff => 2,
            Self::Failed => 3,
            Self::Stopped => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Capturing,
            2 => Self::Backoff,
            3 => Self::Failed,
            _ => Self::Stopped,
        }
    }
}

/// How a capture run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Cancelled, or the dispatcher went away.
    Stopped,
    /// Retries exhausted; the cancel signal has been raised.
    Failed {
        /// Consecutive failed attempts.
        attempts: u32,
    },
}

/// Retry policy for the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Consecutive failures allowed before giving up.
    pub max_retries: u32,
    /// Wait between attempts.
    pub reconnect_delay: Duration,
}

/// Owns the hardware stream for the lifetime of a session.
pub struct CaptureScheduler<B> {
    backend: B,
    device: DeviceDescriptor,
    params: StreamParams,
    policy: RetryPolicy,
    tx: mpsc::Sender<AudioFrame>,
    cancel: CancelSignal,
    state: Arc<SessionState>,
    on_event: Option<EventCallback>,
    retries: u32,
    started: Instant,
}

impl<B: AudioBackend> CaptureScheduler<B> {
    /// Creates a scheduler; nothing is opened until [`run`](Self::run).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        backend: B,
        device: DeviceDescriptor,
        params: StreamParams,
        policy: RetryPolicy,
        tx: mpsc::Sender<AudioFrame>,
        cancel: CancelSignal,
        state: Arc<SessionState>,
        on_event: Option<EventCallback>,
    ) -> Self {
        tracing::info!(
            device = %device.name,
            sample_rate = params.sample_rate,
            block_size = params.block_size,
            max_retries = policy.max_retries,
            "Capture scheduler created"
        );
        Self {
            backend,
            device,
            params,
            policy,
            tx,
            cancel,
            state,
            on_event,
            retries: 0,
            started: Instant::now(),
        }
    }

    /// Captures until cancelled or until retries are exhausted.
    pub fn run(mut self) -> CaptureOutcome {
        loop {
            if self.cancel.is_cancelled() {
                return self.stopped();
            }

            self.set_state(CaptureState::Connecting);
            let failure = match self.backend.open(&self.device, &self.params) {
                Ok(mut stream) => {
                    if self.retries > 0 {
                        tracing::info!(
                            after = self.retries,
                            "Input stream reconnected, retry counter reset"
                        );
                    }
                    self.retries = 0;
                    self.state.consecutive_failures.store(0, Ordering::SeqCst);
                    self.set_state(CaptureState::Capturing);

                    let result = self.capture(stream.as_mut());
                    // Release the device before backing off or returning.
                    drop(stream);
                    match result {
                        Some(err) => err,
                        None => return self.stopped(),
                    }
                }
                Err(err) => err,
            };

            if let Some(outcome) = self.record_failure(&failure) {
                return outcome;
            }

            self.set_state(CaptureState::Backoff);
            tracing::info!(
                delay_ms = self.policy.reconnect_delay.as_millis() as u64,
                "Waiting before reconnect"
            );
            if self.cancel.wait_timeout(self.policy.reconnect_delay) {
                return self.stopped();
            }
        }
    }

    /// Reads blocks until a hardware error (returned) or cancellation.
    fn capture(&mut self, stream: &mut dyn InputStream) -> Option<HardwareError> {
        while !self.cancel.is_cancelled() {
            let block = match stream.read(self.params.block_size, &self.cancel) {
                Ok(block) => block,
                Err(err) => return Some(err),
            };
            // A read cut short by cancellation is not a frame
            if self.cancel.is_cancelled() {
                break;
            }

            if block.overflowed {
                let total = self.state.hardware_overflows.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(total, "Input overflow reported by hardware");
                emit(self.on_event.as_ref(), MeterEvent::HardwareOverflow { total });
            }

            if !self.push(block.samples) {
                tracing::debug!("Frame channel closed, stopping capture");
                return None;
            }
        }
        None
    }

    /// Hands a block to the dispatcher without blocking.
    ///
    /// Returns `false` once the receiving side is gone.
    fn push(&mut self, samples: Vec<f32>) -> bool {
        let frame = AudioFrame::new(samples, self.started.elapsed(), self.params.sample_rate);
        self.state.frames_captured.fetch_add(1, Ordering::SeqCst);

        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                let total_dropped = self.state.frames_dropped.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(
                    timestamp_ms = frame.timestamp.as_millis() as u64,
                    total_dropped,
                    "Frame channel full, dropping frame"
                );
                emit(
                    self.on_event.as_ref(),
                    MeterEvent::FrameDropped {
                        timestamp: frame.timestamp,
                        total_dropped,
                    },
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Counts a failure; returns the final outcome once retries run out.
    fn record_failure(&mut self, err: &HardwareError) -> Option<CaptureOutcome> {
        self.retries += 1;
        self.state
            .consecutive_failures
            .store(self.retries, Ordering::SeqCst);
        self.state.reconnect_attempts.fetch_add(1, Ordering::SeqCst);

        tracing::error!(
            attempt = self.retries,
            max = self.policy.max_retries,
            "Audio stream error ({}/{}): {}",
            self.retries,
            self.policy.max_retries,
            err
        );
        emit(
            self.on_event.as_ref(),
            MeterEvent::StreamError {
                attempt: self.retries,
                max_retries: self.policy.max_retries,
                error: err.to_string(),
            },
        );

        if self.retries < self.policy.max_retries {
            return None;
        }

        tracing::error!(
            attempts = self.retries,
            "Max retries reached, giving up on audio capture"
        );
        self.set_state(CaptureState::Failed);
        emit(
            self.on_event.as_ref(),
            MeterEvent::CaptureFailed {
                attempts: self.retries,
            },
        );
        self.cancel.cancel();
        Some(CaptureOutcome::Failed {
            attempts: self.retries,
        })
    }

    fn stopped(&mut self) -> CaptureOutcome {
        tracing::info!("Capture stopped");
        self.set_state(CaptureState::Stopped);
        CaptureOutcome::Stopped
    }

    fn set_state(&self, next: CaptureState) {
        if self.state.capture_state() == next {
            return;
        }
        tracing::debug!(?next, "Capture state change");
        self.state.set_capture_state(next);
        emit(
            self.on_event.as_ref(),
            MeterEvent::CaptureStateChanged { state: next },
        );
    }
}
