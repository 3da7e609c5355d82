//! Dispatcher task that runs the transformer chain and fans frames out to
//! sinks.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::event::{emit, EventCallback};
use crate::session::SessionState;
use crate::sink::Sink;
use crate::transform::Transformer;
use crate::{AudioFrame, CancelSignal, MeterError, MeterEvent};

/// What happened to one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Name of the transformer that rejected the frame, if any.
    pub rejected_by: Option<String>,
    /// Sinks that handled the frame.
    pub delivered: usize,
    /// Sinks that failed on the frame.
    pub failed_sinks: Vec<String>,
    /// Shutdown was requested while a sink was still handling the frame.
    pub interrupted: bool,
}

impl DispatchReport {
    /// `true` if the frame reached every sink.
    pub fn is_complete(&self) -> bool {
        self.rejected_by.is_none() && self.failed_sinks.is_empty() && !self.interrupted
    }
}

/// Single consumer of the frame channel.
///
/// The transformer chain and the sink list are fixed at construction. A
/// transformer failure drops the frame for every sink; a sink failure only
/// affects that sink.
pub struct Dispatcher {
    transformers: Vec<Box<dyn Transformer>>,
    sinks: Vec<Box<dyn Sink>>,
    cancel: CancelSignal,
    pop_timeout: Duration,
    state: Arc<SessionState>,
    on_event: Option<EventCallback>,
}

impl Dispatcher {
    pub(crate) fn new(
        transformers: Vec<Box<dyn Transformer>>,
        sinks: Vec<Box<dyn Sink>>,
        cancel: CancelSignal,
        pop_timeout: Duration,
        state: Arc<SessionState>,
        on_event: Option<EventCallback>,
    ) -> Self {
        Self {
            transformers,
            sinks,
            cancel,
            pop_timeout,
            state,
            on_event,
        }
    }

    /// Calls `on_start` on every sink, in order.
    ///
    /// # Errors
    ///
    /// Returns `SinkStartFailed` for the first sink that fails. Sinks that
    /// already started are stopped again.
    pub(crate) async fn start_sinks(&mut self) -> Result<(), MeterError> {
        for i in 0..self.sinks.len() {
            if let Err(e) = self.sinks[i].on_start().await {
                let sink_name = self.sinks[i].name().to_string();
                tracing::error!(sink = %sink_name, "Sink failed to start: {}", e);
                for started in &mut self.sinks[..i] {
                    if let Err(e) = started.on_stop().await {
                        tracing::warn!(sink = %started.name(), "Sink stop failed: {}", e);
                    }
                }
                return Err(MeterError::SinkStartFailed {
                    sink_name,
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Pops frames until cancelled or until the capture side hangs up, then
    /// stops every sink.
    pub async fn run(mut self, mut rx: mpsc::Receiver<AudioFrame>) {
        tracing::info!(
            transformers = self.transformers.len(),
            sinks = self.sinks.len(),
            "Dispatcher started"
        );

        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!("Dispatcher observed cancellation");
                break;
            }
            match tokio::time::timeout(self.pop_timeout, rx.recv()).await {
                Ok(Some(frame)) => {
                    self.dispatch(frame).await;
                }
                Ok(None) => {
                    tracing::debug!("Frame channel closed");
                    break;
                }
                Err(_) => {
                    // Nothing arrived; loop to re-check cancellation
                }
            }
        }

        self.stop_sinks().await;
        tracing::info!("Dispatcher stopped");
    }

    /// Runs one frame through the transformer chain and every sink.
    pub async fn dispatch(&mut self, frame: AudioFrame) -> DispatchReport {
        let mut report = DispatchReport::default();

        let mut frame = frame;
        for transformer in &mut self.transformers {
            match transformer.process(frame) {
                Ok(next) => frame = next,
                Err(e) => {
                    let name = transformer.name().to_string();
                    self.state.transform_failures.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(transformer = %name, "Transform failed, frame dropped: {}", e);
                    emit(
                        self.on_event.as_ref(),
                        MeterEvent::TransformError {
                            transformer: name.clone(),
                            error: e.to_string(),
                        },
                    );
                    report.rejected_by = Some(name);
                    return report;
                }
            }
        }

        tracing::debug!(
            samples = frame.len(),
            timestamp_ms = frame.timestamp.as_millis() as u64,
            "Dispatching frame"
        );

        for sink in &mut self.sinks {
            let sink_name = sink.name().to_string();
            // A sink blocked on a consumer that stopped reading must not
            // hold up shutdown.
            let result = tokio::select! {
                biased;
                result = sink.handle(&frame) => result,
                () = self.cancel.cancelled(self.pop_timeout) => {
                    tracing::warn!(
                        sink = %sink_name,
                        "Shutdown while sink was busy, frame abandoned"
                    );
                    report.interrupted = true;
                    return report;
                }
            };
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    self.state.sink_failures.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(sink = %sink_name, "Sink failed: {}", e);
                    emit(
                        self.on_event.as_ref(),
                        MeterEvent::SinkError {
                            sink_name: sink_name.clone(),
                            error: e.to_string(),
                        },
                    );
                    report.failed_sinks.push(sink_name);
                }
            }
        }

        self.state.frames_dispatched.fetch_add(1, Ordering::SeqCst);
        report
    }

    async fn stop_sinks(&mut self) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.on_stop().await {
                tracing::warn!(sink = %sink.name(), "Sink stop failed: {}", e);
                emit(
                    self.on_event.as_ref(),
                    MeterEvent::SinkError {
                        sink_name: sink.name().to_string(),
                        error: e.to_string(),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SinkError, TransformError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Counts frames; fails every frame when `fail` is set.
    struct TestSink {
        name: String,
        received: Arc<AtomicUsize>,
        stopped: Arc<AtomicBool>,
        fail: bool,
        fail_start: bool,
    }

    impl TestSink {
        fn new(name: &str) -> (Self, Arc<AtomicUsize>, Arc<AtomicBool>) {
            let received = Arc::new(AtomicUsize::new(0));
            let stopped = Arc::new(AtomicBool::new(false));
            let sink = Self {
                name: name.to_string(),
                received: Arc::clone(&received),
                stopped: Arc::clone(&stopped),
                fail: false,
                fail_start: false,
            };
            (sink, received, stopped)
        }
    }

    #[async_trait]
    impl Sink for TestSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_start(&mut self) -> Result<(), SinkError> {
            if self.fail_start {
                return Err(SinkError::custom("cannot open"));
            }
            Ok(())
        }

        async fn handle(&mut self, _frame: &AudioFrame) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::custom("intentional failure"));
            }
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_stop(&mut self) -> Result<(), SinkError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Doubles samples; rejects frames whose first sample is negative.
    struct Gain;

    impl Transformer for Gain {
        fn name(&self) -> &str {
            "gain"
        }

        fn process(&mut self, frame: AudioFrame) -> Result<AudioFrame, TransformError> {
            if frame.samples.first().is_some_and(|&s| s < 0.0) {
                return Err(TransformError::custom("negative"));
            }
            let doubled = frame.samples.iter().map(|s| s * 2.0).collect();
            Ok(frame.with_samples(doubled))
        }
    }

    /// Records the first sample of every frame it sees.
    struct FirstSamples(Arc<Mutex<Vec<f32>>>);

    #[async_trait]
    impl Sink for FirstSamples {
        fn name(&self) -> &str {
            "first-samples"
        }

        async fn handle(&mut self, frame: &AudioFrame) -> Result<(), SinkError> {
            self.0.lock().push(frame.samples[0]);
            Ok(())
        }
    }

    fn dispatcher(
        transformers: Vec<Box<dyn Transformer>>,
        sinks: Vec<Box<dyn Sink>>,
    ) -> (Dispatcher, CancelSignal, Arc<SessionState>) {
        let cancel = CancelSignal::new();
        let state = Arc::new(SessionState::new());
        let dispatcher = Dispatcher::new(
            transformers,
            sinks,
            cancel.clone(),
            Duration::from_millis(20),
            Arc::clone(&state),
            None,
        );
        (dispatcher, cancel, state)
    }

    fn frame(first: f32) -> AudioFrame {
        AudioFrame::new(vec![first; 8], Duration::ZERO, 48000)
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_affect_others() {
        let (good, good_count, _) = TestSink::new("good");
        let (mut bad, bad_count, _) = TestSink::new("bad");
        bad.fail = true;
        let (mut dispatcher, _cancel, state) =
            dispatcher(Vec::new(), vec![Box::new(bad), Box::new(good)]);

        let report = dispatcher.dispatch(frame(0.1)).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed_sinks, vec!["bad".to_string()]);
        assert!(!report.is_complete());
        assert_eq!(good_count.load(Ordering::SeqCst), 1);
        assert_eq!(bad_count.load(Ordering::SeqCst), 0);
        assert_eq!(state.sink_failures.load(Ordering::SeqCst), 1);
        assert_eq!(state.frames_dispatched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transform_failure_drops_frame_for_all_sinks() {
        let (sink, count, _) = TestSink::new("counter");
        let (mut dispatcher, _cancel, state) =
            dispatcher(vec![Box::new(Gain)], vec![Box::new(sink)]);

        let report = dispatcher.dispatch(frame(-0.1)).await;

        assert_eq!(report.rejected_by.as_deref(), Some("gain"));
        assert_eq!(report.delivered, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(state.transform_failures.load(Ordering::SeqCst), 1);
        assert_eq!(state.frames_dispatched.load(Ordering::SeqCst), 0);

        // The next good frame still flows
        assert!(dispatcher.dispatch(frame(0.1)).await.is_complete());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transformers_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (mut dispatcher, _cancel, _state) = dispatcher(
            vec![Box::new(Gain), Box::new(Gain)],
            vec![Box::new(FirstSamples(Arc::clone(&seen)))],
        );

        dispatcher.dispatch(frame(0.25)).await;
        assert_eq!(*seen.lock(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_events_emitted_for_failures() {
        let events = Arc::new(Mutex::new(Vec::<MeterEvent>::new()));
        let sink_events = Arc::clone(&events);
        let (mut bad, _, _) = TestSink::new("bad");
        bad.fail = true;
        let (mut dispatcher, _cancel, _state) = dispatcher(vec![Box::new(Gain)], vec![Box::new(bad)]);
        dispatcher.on_event = Some(Arc::new(move |e: MeterEvent| sink_events.lock().push(e)));

        dispatcher.dispatch(frame(-1.0)).await;
        dispatcher.dispatch(frame(1.0)).await;

        let events = events.lock();
        assert!(matches!(events[0], MeterEvent::TransformError { .. }));
        assert!(matches!(&events[1], MeterEvent::SinkError { sink_name, .. } if sink_name == "bad"));
    }

    #[tokio::test]
    async fn test_run_stops_sinks_on_cancel() {
        let (sink, count, stopped) = TestSink::new("counter");
        let (dispatcher, cancel, _state) = dispatcher(Vec::new(), vec![Box::new(sink)]);
        let (tx, rx) = mpsc::channel(4);

        let handle = tokio::spawn(dispatcher.run(rx));
        tx.send(frame(0.1)).await.unwrap();
        tx.send(frame(0.1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        // Exits within one pop timeout even though the sender is still alive
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_sink() {
        use crate::ChannelSink;

        // Held but never read: the second frame blocks inside the sink
        let (sink_tx, _sink_rx) = mpsc::channel::<AudioFrame>(1);
        let (dispatcher, cancel, state) =
            dispatcher(Vec::new(), vec![Box::new(ChannelSink::new(sink_tx))]);
        let (tx, rx) = mpsc::channel(4);

        let handle = tokio::spawn(dispatcher.run(rx));
        for _ in 0..3 {
            tx.send(frame(0.1)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.frames_dispatched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_reports_interruption() {
        struct Stuck;

        #[async_trait]
        impl Sink for Stuck {
            fn name(&self) -> &str {
                "stuck"
            }

            async fn handle(&mut self, _frame: &AudioFrame) -> Result<(), SinkError> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let (mut dispatcher, cancel, state) = dispatcher(Vec::new(), vec![Box::new(Stuck)]);
        cancel.cancel();

        let report = dispatcher.dispatch(frame(0.1)).await;
        assert!(report.interrupted);
        assert!(!report.is_complete());
        assert_eq!(report.delivered, 0);
        assert_eq!(state.frames_dispatched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_exits_when_channel_closes() {
        let (sink, count, stopped) = TestSink::new("counter");
        let (dispatcher, _cancel, _state) = dispatcher(Vec::new(), vec![Box::new(sink)]);
        let (tx, rx) = mpsc::channel(4);

        tx.send(frame(0.1)).await.unwrap();
        drop(tx);
        dispatcher.run(rx).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_start_failure_stops_started_sinks() {
        let (first, _, first_stopped) = TestSink::new("first");
        let (mut second, _, _) = TestSink::new("second");
        second.fail_start = true;
        let (mut dispatcher, _cancel, _state) =
            dispatcher(Vec::new(), vec![Box::new(first), Box::new(second)]);

        let err = dispatcher.start_sinks().await.unwrap_err();
        assert!(matches!(err, MeterError::SinkStartFailed { ref sink_name, .. } if sink_name == "second"));
        assert!(first_stopped.load(Ordering::SeqCst));
    }
}
