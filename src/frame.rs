//! Audio frame with capture metadata.

use std::sync::Arc;
use std::time::Duration;

/// One block of mono audio captured in a single hardware read.
///
/// `AudioFrame` is the unit passed from capture through the transformer
/// chain to the sinks. Samples are normalized `f32` in `[-1.0, 1.0]`.
///
/// Samples are stored in an `Arc<Vec<f32>>` so fanning a frame out to
/// several sinks never copies the audio.
///
/// # Example
///
/// ```
/// use spl_meter::AudioFrame;
/// use std::time::Duration;
///
/// let frame = AudioFrame::new(vec![0.0; 4800], Duration::ZERO, 48000);
/// assert_eq!(frame.duration(), Duration::from_millis(100));
/// assert_eq!(frame.len(), 4800);
/// ```
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Arc<Vec<f32>>,

    /// Monotonic capture time, measured from the start of the session.
    pub timestamp: Duration,

    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Creates a new frame.
    pub fn new(samples: Vec<f32>, timestamp: Duration, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            timestamp,
            sample_rate,
        }
    }

    /// Returns a frame carrying `samples` with this frame's timestamp and rate.
    ///
    /// Transformers use this to emit their output.
    #[must_use]
    pub fn with_samples(&self, samples: Vec<f32>) -> Self {
        Self {
            samples: Arc::new(samples),
            timestamp: self.timestamp,
            sample_rate: self.sample_rate,
        }
    }

    /// Number of samples in the frame.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if this frame contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the duration of audio in this frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}
