//! CPAL backend for real input devices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::{AudioBackend, CapturedBlock, DeviceDescriptor, InputStream, StreamParams};
use crate::{CancelSignal, HardwareError};

/// Extra time a read may wait beyond the block duration before the stream is
/// considered stalled.
const STALL_SLACK: Duration = Duration::from_secs(2);

/// How often a pending read checks the ring buffer.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Opens input streams on the default CPAL host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    /// Creates a backend for the default host.
    pub fn new() -> Self {
        Self
    }

    fn find_device(descriptor: &DeviceDescriptor) -> Result<Device, HardwareError> {
        let host = cpal::default_host();
        let mut devices = host
            .input_devices()
            .map_err(|e| HardwareError::Open(e.to_string()))?;

        let device = devices
            .nth(descriptor.index)
            .ok_or(HardwareError::Disconnected)?;
        // The list can shift when devices come and go.
        match device.name() {
            Ok(name) if name == descriptor.name => Ok(device),
            _ => Err(HardwareError::Disconnected),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open(
        &self,
        descriptor: &DeviceDescriptor,
        params: &StreamParams,
    ) -> Result<Box<dyn InputStream>, HardwareError> {
        let device = Self::find_device(descriptor)?;
        let sample_format = device
            .default_input_config()
            .map_err(|e| HardwareError::Open(e.to_string()))?
            .sample_format();

        let config = cpal::StreamConfig {
            channels: params.channels.max(1),
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // Room for two blocks, so one read can lag behind the callback.
        let capacity = (params.block_size * 2).max(params.sample_rate as usize);
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let shared = Arc::new(StreamShared::default());

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, producer, &shared)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, producer, &shared)?,
            SampleFormat::I32 => build_stream::<i32>(&device, &config, producer, &shared)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, producer, &shared)?,
            format => {
                return Err(HardwareError::Open(format!(
                    "unsupported sample format: {format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| HardwareError::Open(e.to_string()))?;

        tracing::info!(
            device = %descriptor.name,
            sample_rate = params.sample_rate,
            channels = config.channels,
            block_size = params.block_size,
            "Input stream opened"
        );

        let block_duration =
            Duration::from_secs_f64(params.block_size as f64 / f64::from(params.sample_rate));
        Ok(Box::new(CpalInputStream {
            _stream: stream,
            consumer,
            shared,
            read_timeout: block_duration + STALL_SLACK,
        }))
    }
}

/// State the audio callback shares with the reading thread.
#[derive(Default)]
struct StreamShared {
    overflowed: AtomicBool,
    error: Mutex<Option<HardwareError>>,
}

fn build_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    mut producer: HeapProd<f32>,
    shared: &Arc<StreamShared>,
) -> Result<Stream, HardwareError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels);
    let data_shared = Arc::clone(shared);
    let error_shared = Arc::clone(shared);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Non-blocking: samples that don't fit are counted as overflow
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
                    if producer.try_push(sum / frame.len() as f32).is_err() {
                        data_shared.overflowed.store(true, Ordering::Relaxed);
                    }
                }
            },
            move |err| {
                tracing::error!("Audio stream error: {}", err);
                let mapped = match err {
                    cpal::StreamError::DeviceNotAvailable => HardwareError::Disconnected,
                    other => HardwareError::Stream(other.to_string()),
                };
                *error_shared.error.lock() = Some(mapped);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => HardwareError::Disconnected,
            other => HardwareError::Open(other.to_string()),
        })
}

/// A running CPAL input stream. Dropping it stops capture.
struct CpalInputStream {
    _stream: Stream,
    consumer: HeapCons<f32>,
    shared: Arc<StreamShared>,
    read_timeout: Duration,
}

impl InputStream for CpalInputStream {
    fn read(
        &mut self,
        block_size: usize,
        cancel: &CancelSignal,
    ) -> Result<CapturedBlock, HardwareError> {
        let started = Instant::now();
        let mut samples = vec![0.0f32; block_size];
        let mut filled = 0;

        while filled < block_size {
            if cancel.is_cancelled() {
                samples.truncate(filled);
                break;
            }
            if let Some(err) = self.shared.error.lock().take() {
                return Err(err);
            }
            filled += self.consumer.pop_slice(&mut samples[filled..]);
            if filled == block_size {
                break;
            }
            if started.elapsed() > self.read_timeout {
                return Err(HardwareError::Stalled {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            cancel.wait_timeout(POLL_INTERVAL);
        }

        Ok(CapturedBlock {
            samples,
            overflowed: self.shared.overflowed.swap(false, Ordering::Relaxed),
        })
    }
}
