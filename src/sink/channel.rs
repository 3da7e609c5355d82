//! Tokio mpsc channel sink implementation.

use crate::sink::Sink;
use crate::{AudioFrame, SinkError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A sink that sends corrected frames to a tokio mpsc channel.
///
/// Frames share their sample buffer, so forwarding never copies audio.
///
/// # Example
///
/// ```
/// use spl_meter::{AudioFrame, ChannelSink};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<AudioFrame>(16);
/// let sink = ChannelSink::new(tx);
///
/// // Use sink with the Meter builder...
/// // Then receive frames:
/// // while let Some(frame) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<AudioFrame>,
}

impl ChannelSink {
    /// Creates a new channel sink with the given sender.
    ///
    /// A slow receiver holds up the dispatcher, so give the channel enough
    /// capacity for your consumer.
    pub fn new(sender: mpsc::Sender<AudioFrame>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a new channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<AudioFrame>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&mut self, frame: &AudioFrame) -> Result<(), SinkError> {
        self.sender
            .send(frame.clone())
            .await
            .map_err(|_| SinkError::ChannelClosed)
    }
}
