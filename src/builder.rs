//! Builder pattern for [`Meter`] sessions.

use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;

use crate::calibration::{CorrectionFilter, FileFilterCache, FilterCache, Sensitivity};
use crate::metrics::{MetricsCalculator, MetricsSettings, MetricsSnapshot};
use crate::pipeline::{CaptureScheduler, Dispatcher, RetryPolicy};
use crate::session::{MeterSession, SessionState};
use crate::sink::{MetricsSink, Sink};
use crate::source::{
    select_input_device, AudioBackend, CpalBackend, DeviceDescriptor, StreamParams,
};
use crate::transform::Transformer;
use crate::{event_callback, CancelSignal, EventCallback, MeterConfig, MeterError, MeterEvent};

/// Channels opened on the hardware; the stream is downmixed to mono anyway.
const CAPTURE_CHANNELS: u16 = 1;

/// Entry point for building a metering session.
pub struct Meter;

impl Meter {
    /// Creates a builder using real hardware.
    pub fn builder() -> MeterBuilder {
        MeterBuilder::new()
    }
}

/// Metrics the builder attaches once the sample rate is known.
struct MetricsRequest {
    sender: Option<mpsc::Sender<MetricsSnapshot>>,
}

/// Builder for configuring and starting a metering session.
///
/// Use [`Meter::builder()`] to create a new builder.
///
/// On [`start()`](Self::start) the builder resolves the device, loads (or
/// designs) the correction filter when a calibration file is configured,
/// starts every sink and then launches the capture thread and the dispatch
/// task.
///
/// # Example
///
/// ```ignore
/// use spl_meter::{Meter, MeterConfig, RecorderSink};
/// use std::time::Duration;
///
/// let config = MeterConfig {
///     calibration_file: Some("umik-1/7175488.txt".into()),
///     ..Default::default()
/// };
///
/// let session = Meter::builder()
///     .config(config)
///     .metrics()
///     .add_sink(RecorderSink::new("recordings", Duration::from_secs(3600)))
///     .on_event(|e| tracing::warn!(?e, "meter event"))
///     .start()
///     .await?;
///
/// tokio::signal::ctrl_c().await?;
/// session.stop().await?;
/// ```
pub struct MeterBuilder<B = CpalBackend> {
    config: MeterConfig,
    backend: B,
    device: Option<DeviceDescriptor>,
    cache: Box<dyn FilterCache>,
    transformers: Vec<Box<dyn Transformer>>,
    sinks: Vec<Box<dyn Sink>>,
    metrics: Option<MetricsRequest>,
    event_callback: Option<EventCallback>,
}

impl Default for MeterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MeterBuilder {
    /// Creates a new builder with default configuration and the CPAL backend.
    pub fn new() -> Self {
        Self {
            config: MeterConfig::default(),
            backend: CpalBackend::new(),
            device: None,
            cache: Box::new(FileFilterCache::new()),
            transformers: Vec::new(),
            sinks: Vec::new(),
            metrics: None,
            event_callback: None,
        }
    }
}

impl<B: AudioBackend> MeterBuilder<B> {
    /// Sets the session configuration.
    #[must_use]
    pub fn config(mut self, config: MeterConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the hardware backend (e.g. with a
    /// [`MockBackend`](crate::source::MockBackend)).
    pub fn backend<B2: AudioBackend>(self, backend: B2) -> MeterBuilder<B2> {
        MeterBuilder {
            config: self.config,
            backend,
            device: self.device,
            cache: self.cache,
            transformers: self.transformers,
            sinks: self.sinks,
            metrics: self.metrics,
            event_callback: self.event_callback,
        }
    }

    /// Uses this device instead of resolving `config.device` on the host.
    #[must_use]
    pub fn device(mut self, device: DeviceDescriptor) -> Self {
        self.device = Some(device);
        self
    }

    /// Sets where designed filters are cached. Default: next to the
    /// calibration file.
    #[must_use]
    pub fn filter_cache(mut self, cache: impl FilterCache + 'static) -> Self {
        self.cache = Box::new(cache);
        self
    }

    /// Adds a transformer. Transformers run in insertion order, after the
    /// correction filter.
    #[must_use]
    pub fn add_transformer<T: Transformer + 'static>(mut self, transformer: T) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    /// Adds a sink. Every sink receives every corrected frame.
    #[must_use]
    pub fn add_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Attaches a [`MetricsSink`] that logs a snapshot every
    /// `config.metrics_interval`.
    #[must_use]
    pub fn metrics(mut self) -> Self {
        self.metrics = Some(MetricsRequest { sender: None });
        self
    }

    /// Like [`metrics()`](Self::metrics), and also forwards each snapshot on
    /// `sender`.
    #[must_use]
    pub fn metrics_to(mut self, sender: mpsc::Sender<MetricsSnapshot>) -> Self {
        self.metrics = Some(MetricsRequest {
            sender: Some(sender),
        });
        self
    }

    /// Sets a callback for runtime events (dropped frames, hardware errors,
    /// sink errors).
    #[must_use]
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(MeterEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Starts capture and dispatch.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the device cannot
    /// be found, the calibration file cannot be used or a sink fails to
    /// start.
    pub async fn start(self) -> Result<MeterSession, MeterError> {
        let Self {
            mut config,
            backend,
            device,
            cache,
            transformers,
            mut sinks,
            metrics,
            event_callback,
        } = self;

        config.validate()?;

        let device = match device {
            Some(device) => device,
            None => select_input_device(config.device)?,
        };
        config.device = Some(device.index);
        config.validate_device(device.is_default.then_some(device.index))?;

        // With a calibration file the device's native rate wins.
        let sample_rate = match &config.calibration_file {
            Some(_) if device.default_sample_rate > 0 => device.default_sample_rate,
            _ => config.sample_rate,
        };

        let mut chain: Vec<Box<dyn Transformer>> = Vec::with_capacity(transformers.len() + 1);
        let mut sensitivity = None;
        if let Some(path) = &config.calibration_file {
            let filter = CorrectionFilter::load_or_design(
                path,
                sample_rate,
                config.num_taps,
                &*cache,
                config.force_filter_rebuild,
            )?;
            let sens = Sensitivity::load(
                path,
                config.nominal_sensitivity_dbfs,
                config.reference_dbspl,
            )?;
            tracing::info!(
                sensitivity_dbfs = sens.sensitivity_dbfs,
                reference_dbspl = sens.reference_dbspl,
                "Microphone sensitivity loaded"
            );
            sensitivity = Some(sens);
            chain.push(Box::new(filter));
        }
        chain.extend(transformers);

        if let Some(request) = metrics {
            let calculator = MetricsCalculator::new(
                sample_rate,
                MetricsSettings::from_config(&config, sensitivity),
            );
            let mut sink = MetricsSink::new(calculator, config.metrics_interval);
            if let Some(sender) = request.sender {
                sink = sink.with_sender(sender);
            }
            sinks.insert(0, Box::new(sink));
        }

        let params = StreamParams {
            sample_rate,
            block_size: config.block_size(sample_rate),
            channels: CAPTURE_CHANNELS,
        };

        tracing::info!(
            device = %device.name,
            sample_rate,
            buffer_seconds = config.effective_buffer_seconds(),
            transformers = chain.len(),
            sinks = sinks.len(),
            "Starting meter"
        );

        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let state = Arc::new(SessionState::new());
        let cancel = CancelSignal::new();

        let mut dispatcher = Dispatcher::new(
            chain,
            sinks,
            cancel.clone(),
            config.pop_timeout,
            Arc::clone(&state),
            event_callback.clone(),
        );
        dispatcher.start_sinks().await?;
        let dispatch_handle = tokio::spawn(dispatcher.run(rx));

        let scheduler = CaptureScheduler::new(
            backend,
            device.clone(),
            params,
            RetryPolicy {
                max_retries: config.max_retries,
                reconnect_delay: config.reconnect_delay,
            },
            tx,
            cancel.clone(),
            Arc::clone(&state),
            event_callback,
        );
        let capture_handle = match thread::Builder::new()
            .name("spl-capture".to_string())
            .spawn(move || scheduler.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                cancel.cancel();
                return Err(MeterError::BackendError(format!(
                    "failed to spawn capture thread: {e}"
                )));
            }
        };

        Ok(MeterSession::new(
            state,
            cancel,
            device,
            sample_rate,
            dispatch_handle,
            capture_handle,
        ))
    }
}
