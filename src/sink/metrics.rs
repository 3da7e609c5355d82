//! Metrics sink: turns corrected frames into logged snapshots.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::metrics::{MetricsAggregator, MetricsCalculator, MetricsSnapshot};
use crate::sink::Sink;
use crate::{AudioFrame, SinkError};

/// A sink that measures frames with a [`MetricsAggregator`].
///
/// Every snapshot is logged at `info` level and, if a sender was attached,
/// forwarded on it. A receiver that falls behind loses snapshots rather than
/// holding up the dispatcher.
///
/// # Example
///
/// ```
/// use spl_meter::metrics::{MetricsCalculator, MetricsSettings};
/// use spl_meter::MetricsSink;
/// use std::time::Duration;
/// use tokio::sync::mpsc;
///
/// let (tx, _rx) = mpsc::channel(8);
/// let calculator = MetricsCalculator::new(48000, MetricsSettings::default());
/// let sink = MetricsSink::new(calculator, Duration::from_secs(3)).with_sender(tx);
/// ```
pub struct MetricsSink {
    aggregator: MetricsAggregator,
    sender: Option<mpsc::Sender<MetricsSnapshot>>,
    snapshots: u64,
    dropped: u64,
}

impl MetricsSink {
    /// Creates a sink emitting one snapshot per `interval` of audio
    /// (`Duration::ZERO` for one per frame).
    pub fn new(calculator: MetricsCalculator, interval: Duration) -> Self {
        Self {
            aggregator: MetricsAggregator::new(calculator, interval),
            sender: None,
            snapshots: 0,
            dropped: 0,
        }
    }

    /// Also forwards every snapshot on `sender`.
    #[must_use]
    pub fn with_sender(mut self, sender: mpsc::Sender<MetricsSnapshot>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Snapshots produced so far.
    pub fn snapshots(&self) -> u64 {
        self.snapshots
    }

    /// Snapshots the attached receiver had no room for.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[async_trait]
impl Sink for MetricsSink {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn handle(&mut self, frame: &AudioFrame) -> Result<(), SinkError> {
        let Some(snapshot) = self.aggregator.push(frame) else {
            return Ok(());
        };
        self.snapshots += 1;

        tracing::info!(
            rms = snapshot.rms,
            dbfs = snapshot.dbfs,
            lufs = snapshot.lufs,
            flux = snapshot.flux,
            dbspl = ?snapshot.dbspl,
            "{}",
            snapshot
        );

        if let Some(sender) = &self.sender {
            match sender.try_send(snapshot) {
                Ok(()) => {}
                Err(TrySendError::Full(snapshot)) => {
                    self.dropped += 1;
                    tracing::warn!(
                        measured_at = %snapshot.measured_at,
                        total_dropped = self.dropped,
                        "Snapshot receiver is behind, dropping snapshot"
                    );
                }
                Err(TrySendError::Closed(_)) => return Err(SinkError::ChannelClosed),
            }
        }
        Ok(())
    }

    async fn on_stop(&mut self) -> Result<(), SinkError> {
        if self.aggregator.buffered_samples() > 0 {
            tracing::debug!(
                samples = self.aggregator.buffered_samples(),
                "Discarding incomplete metrics block"
            );
            self.aggregator.clear();
        }
        Ok(())
    }
}
