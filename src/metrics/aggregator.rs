//! Real-time accumulation of frames into measured blocks.

use std::time::Duration;

use chrono::Local;

use super::{MetricsCalculator, MetricsSnapshot};
use crate::AudioFrame;

/// Turns a stream of frames into [`MetricsSnapshot`]s.
///
/// With a zero interval every frame is measured on its own. Otherwise frames
/// are buffered until they hold at least `interval × sample_rate` samples;
/// the whole buffer is then measured as one block and cleared.
#[derive(Debug)]
pub struct MetricsAggregator {
    calculator: MetricsCalculator,
    target_samples: usize,
    buffer: Vec<f32>,
}

impl MetricsAggregator {
    /// Creates an aggregator emitting once per `interval` of audio.
    pub fn new(calculator: MetricsCalculator, interval: Duration) -> Self {
        let target_samples =
            (interval.as_secs_f64() * f64::from(calculator.sample_rate())).round() as usize;
        if target_samples == 0 {
            tracing::info!("Metrics in immediate mode (one snapshot per frame)");
        } else {
            tracing::info!(
                interval_s = interval.as_secs_f64(),
                samples = target_samples,
                "Metrics in windowed mode"
            );
        }
        Self {
            calculator,
            target_samples,
            buffer: Vec::with_capacity(target_samples),
        }
    }

    /// Adds a frame, returning a snapshot when a block is complete.
    pub fn push(&mut self, frame: &AudioFrame) -> Option<MetricsSnapshot> {
        if self.target_samples == 0 {
            return Some(self.calculator.measure(&frame.samples, Local::now()));
        }

        self.buffer.extend_from_slice(&frame.samples);
        if self.buffer.len() < self.target_samples {
            tracing::debug!(
                buffered = self.buffer.len(),
                target = self.target_samples,
                "Buffering metrics block"
            );
            return None;
        }

        let snapshot = self.calculator.measure(&self.buffer, Local::now());
        self.buffer.clear();
        Some(snapshot)
    }

    /// Samples waiting for the next block.
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Samples per block; `0` in immediate mode.
    pub fn target_samples(&self) -> usize {
        self.target_samples
    }

    /// Drops any partially accumulated block.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSettings;

    fn frame(len: usize) -> AudioFrame {
        AudioFrame::new(vec![0.1; len], Duration::ZERO, 48000)
    }

    fn aggregator(interval: Duration) -> MetricsAggregator {
        MetricsAggregator::new(
            MetricsCalculator::new(48000, MetricsSettings::default()),
            interval,
        )
    }

    #[test]
    fn test_immediate_mode_emits_every_frame() {
        let mut agg = aggregator(Duration::ZERO);
        assert_eq!(agg.target_samples(), 0);
        for _ in 0..3 {
            let snap = agg.push(&frame(4800)).unwrap();
            assert_eq!(snap.interval, Duration::from_millis(100));
        }
        assert_eq!(agg.buffered_samples(), 0);
    }

    #[test]
    fn test_windowed_emits_once_per_block() {
        let mut agg = aggregator(Duration::from_secs(3));
        assert_eq!(agg.target_samples(), 144_000);

        // 4 × 36000 = 144000: only the last push completes the block
        for _ in 0..3 {
            assert!(agg.push(&frame(36_000)).is_none());
        }
        let snap = agg.push(&frame(36_000)).expect("block should be complete");
        assert_eq!(snap.interval, Duration::from_secs(3));
        assert_eq!(agg.buffered_samples(), 0);

        // Accumulation starts over
        assert!(agg.push(&frame(36_000)).is_none());
        assert_eq!(agg.buffered_samples(), 36_000);
    }

    #[test]
    fn test_windowed_overshoot_measures_whole_buffer() {
        let mut agg = aggregator(Duration::from_secs(3));
        assert!(agg.push(&frame(100_000)).is_none());
        let snap = agg.push(&frame(100_000)).unwrap();
        // The full 200000 samples are measured together
        assert!((snap.interval.as_secs_f64() - 200_000.0 / 48_000.0).abs() < 1e-9);
        assert_eq!(agg.buffered_samples(), 0);
    }

    #[test]
    fn test_single_large_frame_completes_block() {
        let mut agg = aggregator(Duration::from_secs(3));
        let snapshots: Vec<_> = [frame(288_000)]
            .iter()
            .filter_map(|f| agg.push(f))
            .collect();
        assert_eq!(snapshots.len(), 1);
    }

    #[test]
    fn test_clear_drops_partial_block() {
        let mut agg = aggregator(Duration::from_secs(3));
        agg.push(&frame(1000));
        agg.clear();
        assert_eq!(agg.buffered_samples(), 0);
    }
}
