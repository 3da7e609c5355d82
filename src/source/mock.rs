//! Scripted audio backend for testing without hardware.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{AudioBackend, CapturedBlock, DeviceDescriptor, InputStream, StreamParams};
use crate::{CancelSignal, HardwareError};

/// Synthetic signal a [`MockBackend`] stream produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockSignal {
    /// All zeros.
    Silence,
    /// A sine wave.
    Sine {
        /// Frequency in Hz.
        frequency: f64,
        /// Peak amplitude.
        amplitude: f32,
    },
    /// Deterministic white noise.
    Noise {
        /// Peak amplitude.
        amplitude: f32,
    },
}

/// What the next read on a mock stream does.
#[derive(Debug, Clone)]
pub enum MockRead {
    /// Return a block flagged as overflowed.
    Overflow,
    /// Fail the read.
    Fail(HardwareError),
}

struct MockState {
    signal: MockSignal,
    open_failures: VecDeque<HardwareError>,
    always_fail: bool,
    reads: VecDeque<MockRead>,
    pace: Duration,
    position: u64,
    noise_seed: u32,
    open_attempts: u32,
    blocks_read: u64,
    live_streams: usize,
    max_live_streams: usize,
}

/// A backend whose streams generate a synthetic signal and fail on cue.
///
/// Clones share state, so a test can keep one handle to inspect counters
/// while the capture thread owns the other.
///
/// # Example
///
/// ```
/// use spl_meter::source::{AudioBackend, DeviceDescriptor, MockBackend, MockSignal, StreamParams};
/// use spl_meter::CancelSignal;
///
/// let backend = MockBackend::new(MockSignal::Sine { frequency: 1000.0, amplitude: 0.5 })
///     .fail_opens(2);
/// let device = DeviceDescriptor {
///     index: 0,
///     name: "mock".to_string(),
///     max_input_channels: 1,
///     default_sample_rate: 48000,
///     is_default: true,
/// };
/// let params = StreamParams { sample_rate: 48000, block_size: 4800, channels: 1 };
///
/// assert!(backend.open(&device, &params).is_err());
/// assert!(backend.open(&device, &params).is_err());
/// let mut stream = backend.open(&device, &params).unwrap();
/// let cancel = CancelSignal::new();
/// assert_eq!(stream.read(4800, &cancel).unwrap().samples.len(), 4800);
/// assert_eq!(backend.open_attempts(), 3);
/// ```
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockBackend")
            .field("signal", &state.signal)
            .field("open_attempts", &state.open_attempts)
            .field("blocks_read", &state.blocks_read)
            .finish_non_exhaustive()
    }
}

impl MockBackend {
    /// Creates a backend producing `signal`.
    pub fn new(signal: MockSignal) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                signal,
                open_failures: VecDeque::new(),
                always_fail: false,
                reads: VecDeque::new(),
                pace: Duration::ZERO,
                position: 0,
                noise_seed: 12345,
                open_attempts: 0,
                blocks_read: 0,
                live_streams: 0,
                max_live_streams: 0,
            })),
        }
    }

    /// Creates a silent backend.
    pub fn silence() -> Self {
        Self::new(MockSignal::Silence)
    }

    /// The next `count` opens fail.
    #[must_use]
    pub fn fail_opens(self, count: u32) -> Self {
        {
            let mut state = self.state.lock();
            for attempt in 1..=count {
                state
                    .open_failures
                    .push_back(HardwareError::Open(format!("mock open failure {attempt}")));
            }
        }
        self
    }

    /// Every open fails.
    #[must_use]
    pub fn always_fail(self) -> Self {
        self.state.lock().always_fail = true;
        self
    }

    /// Queues an action for a future read, in order, across streams.
    #[must_use]
    pub fn then_read(self, read: MockRead) -> Self {
        self.state.lock().reads.push_back(read);
        self
    }

    /// Waits this long inside every read, unless cancelled first.
    #[must_use]
    pub fn pace(self, per_read: Duration) -> Self {
        self.state.lock().pace = per_read;
        self
    }

    /// Number of times `open` was called.
    pub fn open_attempts(&self) -> u32 {
        self.state.lock().open_attempts
    }

    /// Number of successful reads.
    pub fn blocks_read(&self) -> u64 {
        self.state.lock().blocks_read
    }

    /// Streams opened and not yet dropped.
    pub fn live_streams(&self) -> usize {
        self.state.lock().live_streams
    }

    /// Most streams that were ever open at once.
    pub fn max_live_streams(&self) -> usize {
        self.state.lock().max_live_streams
    }
}

impl AudioBackend for MockBackend {
    fn open(
        &self,
        device: &DeviceDescriptor,
        params: &StreamParams,
    ) -> Result<Box<dyn InputStream>, HardwareError> {
        let mut state = self.state.lock();
        state.open_attempts += 1;
        if state.always_fail {
            return Err(HardwareError::Open(format!("mock device {} unavailable", device.name)));
        }
        if let Some(err) = state.open_failures.pop_front() {
            return Err(err);
        }

        state.live_streams += 1;
        state.max_live_streams = state.max_live_streams.max(state.live_streams);
        tracing::debug!(device = %device.name, "Mock stream opened");

        Ok(Box::new(MockInputStream {
            state: Arc::clone(&self.state),
            sample_rate: params.sample_rate,
        }))
    }
}

struct MockInputStream {
    state: Arc<Mutex<MockState>>,
    sample_rate: u32,
}

impl InputStream for MockInputStream {
    fn read(
        &mut self,
        block_size: usize,
        cancel: &CancelSignal,
    ) -> Result<CapturedBlock, HardwareError> {
        let pace = self.state.lock().pace;
        if !pace.is_zero() && cancel.wait_timeout(pace) {
            return Ok(CapturedBlock::default());
        }

        let mut state = self.state.lock();
        let overflowed = match state.reads.pop_front() {
            Some(MockRead::Fail(err)) => return Err(err),
            Some(MockRead::Overflow) => true,
            None => false,
        };

        let samples = state.generate(block_size, self.sample_rate);
        state.blocks_read += 1;
        Ok(CapturedBlock {
            samples,
            overflowed,
        })
    }
}

impl Drop for MockInputStream {
    fn drop(&mut self) {
        self.state.lock().live_streams -= 1;
    }
}

impl MockState {
    fn generate(&mut self, len: usize, sample_rate: u32) -> Vec<f32> {
        let start = self.position;
        self.position += len as u64;

        match self.signal {
            MockSignal::Silence => vec![0.0; len],
            MockSignal::Sine {
                frequency,
                amplitude,
            } => {
                let rate = f64::from(sample_rate);
                (start..start + len as u64)
                    .map(|i| {
                        let t = i as f64 / rate;
                        amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
                    })
                    .collect()
            }
            MockSignal::Noise { amplitude } => (0..len)
                .map(|_| {
                    // Simple LCG for deterministic "random" noise
                    self.noise_seed = self
                        .noise_seed
                        .wrapping_mul(1_103_515_245)
                        .wrapping_add(12345);
                    let unit = f32::from((self.noise_seed >> 16) as u16) / 32768.0 - 1.0;
                    amplitude * unit
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceDescriptor {
        DeviceDescriptor {
            index: 0,
            name: "mock".to_string(),
            max_input_channels: 1,
            default_sample_rate: 16000,
            is_default: true,
        }
    }

    fn params() -> StreamParams {
        StreamParams {
            sample_rate: 16000,
            block_size: 1600,
            channels: 1,
        }
    }

    #[test]
    fn test_mock_silence() {
        let backend = MockBackend::silence();
        let cancel = CancelSignal::new();
        let mut stream = backend.open(&device(), &params()).unwrap();
        let block = stream.read(1600, &cancel).unwrap();
        assert_eq!(block.samples.len(), 1600);
        assert!(block.samples.iter().all(|&s| s == 0.0));
        assert!(!block.overflowed);
    }

    #[test]
    fn test_mock_sine_is_continuous_across_reads() {
        let backend = MockBackend::new(MockSignal::Sine {
            frequency: 440.0,
            amplitude: 0.5,
        });
        let cancel = CancelSignal::new();
        let mut stream = backend.open(&device(), &params()).unwrap();
        let first = stream.read(100, &cancel).unwrap().samples;
        let second = stream.read(100, &cancel).unwrap().samples;

        let expected = 0.5 * (2.0 * std::f64::consts::PI * 440.0 * 100.0 / 16000.0).sin() as f32;
        assert!((second[0] - expected).abs() < 1e-6);
        assert!(first.iter().any(|&s| s > 0.0));
        assert!(first.iter().all(|&s| s.abs() <= 0.5));
    }

    #[test]
    fn test_mock_noise_stays_in_range() {
        let backend = MockBackend::new(MockSignal::Noise { amplitude: 0.25 });
        let cancel = CancelSignal::new();
        let mut stream = backend.open(&device(), &params()).unwrap();
        let samples = stream.read(16000, &cancel).unwrap().samples;
        assert!(samples.iter().all(|&s| s.abs() <= 0.25));
        assert!(samples.iter().any(|&s| s > 0.1));
        assert!(samples.iter().any(|&s| s < -0.1));
    }

    #[test]
    fn test_mock_scripted_failures() {
        let backend = MockBackend::silence()
            .fail_opens(1)
            .then_read(MockRead::Overflow)
            .then_read(MockRead::Fail(HardwareError::Disconnected));

        assert!(matches!(
            backend.open(&device(), &params()),
            Err(HardwareError::Open(_))
        ));
        let cancel = CancelSignal::new();
        let mut stream = backend.open(&device(), &params()).unwrap();
        assert!(stream.read(10, &cancel).unwrap().overflowed);
        assert!(matches!(stream.read(10, &cancel), Err(HardwareError::Disconnected)));
        assert!(!stream.read(10, &cancel).unwrap().overflowed);
        assert_eq!(backend.open_attempts(), 2);
        assert_eq!(backend.blocks_read(), 2);
    }

    #[test]
    fn test_cancel_cuts_paced_read_short() {
        let backend = MockBackend::silence().pace(Duration::from_secs(60));
        let cancel = CancelSignal::new();
        let mut stream = backend.open(&device(), &params()).unwrap();

        let remote = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let started = std::time::Instant::now();
        let block = stream.read(1600, &cancel).unwrap();
        canceller.join().unwrap();

        assert!(block.samples.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(backend.blocks_read(), 0);
    }

    #[test]
    fn test_mock_tracks_live_streams() {
        let backend = MockBackend::silence();
        let stream = backend.open(&device(), &params()).unwrap();
        assert_eq!(backend.live_streams(), 1);
        drop(stream);
        assert_eq!(backend.live_streams(), 0);
        assert_eq!(backend.max_live_streams(), 1);
    }

    #[test]
    fn test_mock_always_fail() {
        let backend = MockBackend::silence().always_fail();
        for _ in 0..3 {
            assert!(backend.open(&device(), &params()).is_err());
        }
        assert_eq!(backend.open_attempts(), 3);
    }
}
