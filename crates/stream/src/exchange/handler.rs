use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use http::{HeaderMap, StatusCode};
use tracing::{debug, error, trace};

use crate::protocol::{OpaqueToken, StreamError, StreamFinished};
use crate::sink::{ResponseSink, SinkEvent, SinkFactory, SinkNotifier, SinkRequest};
use crate::transport::FlowControl;

/// Invoked exactly once per exchange, with the failure or the success payload.
pub type CompletionCallback = Box<dyn FnOnce(Result<StreamFinished, StreamError>) + Send>;

/// Lifecycle of one exchange. `Done` is terminal; re-entry is not permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeState {
    Idle,
    Connected,
    Streaming,
    Finalizing,
    Done,
}

struct Inner {
    state: ExchangeState,
    token: OpaqueToken,
    factory: Option<SinkFactory>,
    callback: Option<CompletionCallback>,
    controller: Option<Arc<dyn FlowControl>>,
    sink: Option<Box<dyn ResponseSink>>,
    trailers: Option<HeaderMap>,
    notifier: SinkNotifier,
    events: Option<mpsc::UnboundedReceiver<SinkEvent>>,
}

/// The stream adapter state machine for one exchange.
///
/// Receives lifecycle events pushed by the transport, drives the consumer's
/// sink, couples sink backpressure and errors back into the transport's
/// [`FlowControl`], and invokes the completion callback exactly once.
///
/// # Design
///
/// All exactly-once and no-op-after-teardown guarantees rest on
/// `Option::take` reference clearing, not on the state enum: the factory, the
/// sink and the callback are each single-use references that are nulled on
/// first consumption. The handler is `Clone` (shared interior) so the
/// transport, the sink-event driver task and the entry point can all address
/// the same exchange.
///
/// Sink notifications travel through an unbounded channel and are consumed by
/// a driver task spawned when the sink is installed, so a notification
/// emitted from inside `write` or `end` never re-enters the handler
/// synchronously.
#[derive(Clone)]
pub struct StreamHandler {
    shared: Arc<Mutex<Inner>>,
}

impl StreamHandler {
    pub(crate) fn new(token: OpaqueToken, factory: SinkFactory, callback: CompletionCallback) -> Self {
        let (notifier, events) = SinkNotifier::channel();

        Self {
            shared: Arc::new(Mutex::new(Inner {
                state: ExchangeState::Idle,
                token,
                factory: Some(factory),
                callback: Some(callback),
                controller: None,
                sink: None,
                trailers: None,
                notifier,
                events: Some(events),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The connection is established; stores the flow controller for later use.
    pub fn on_connect(&self, controller: Arc<dyn FlowControl>) {
        let mut inner = self.lock();

        if inner.state != ExchangeState::Idle {
            debug!(state = ?inner.state, "connect event ignored");
            return;
        }

        inner.controller = Some(controller);
        inner.state = ExchangeState::Connected;
    }

    /// Response headers arrived.
    ///
    /// Informational statuses (1xx) are transparent: the exchange keeps
    /// waiting for a later headers event. Otherwise the factory runs (at most
    /// once), the produced sink is checked against the contract, subscribed,
    /// and installed, and body delivery begins.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidReturnValue`] when the factory cannot
    /// produce a conforming sink. The error propagates synchronously to the
    /// calling transport, which must surface it through [`Self::on_error`] on
    /// itself; no body bytes are ever forwarded in that case.
    pub fn on_headers(&self, status: StatusCode, headers: HeaderMap) -> Result<(), StreamError> {
        if status.is_informational() {
            trace!(status = %status, "informational response, keep waiting for headers");
            return Ok(());
        }

        let mut inner = self.lock();

        let Some(factory) = inner.factory.take() else {
            debug!(state = ?inner.state, "headers event without pending factory, ignored");
            return Ok(());
        };
        let token = Arc::clone(&inner.token);

        // The factory may abort this very exchange, so it runs unlocked.
        drop(inner);
        let produced = factory(SinkRequest { status, headers, token });

        let mut inner = self.lock();

        if inner.callback.is_none() {
            // Aborted inside factory. The orphaned sink is torn down
            // defensively before being discarded.
            if let Ok(mut sink) = produced {
                sink.destroy(None);
            }
            return Ok(());
        }

        let mut sink = match produced {
            Ok(sink) => sink,
            Err(e) => {
                error!(cause = %e, "sink factory failed to produce a sink");
                return Err(StreamError::invalid_return_value(e));
            }
        };

        if let Err(e) = sink.subscribe(inner.notifier.clone()) {
            error!(cause = %e, "sink rejected the notification subscription");
            sink.destroy(None);
            return Err(StreamError::invalid_return_value(e));
        }

        inner.sink = Some(sink);
        inner.state = ExchangeState::Streaming;
        let events = inner.events.take();
        drop(inner);

        if let Some(events) = events {
            self.spawn_driver(events);
        }

        Ok(())
    }

    /// One chunk of body data arrived.
    ///
    /// Forwarded to the sink; a `false` return pauses the transport until the
    /// sink reports drained. This is the sole backpressure coupling point.
    pub fn on_data(&self, chunk: Bytes) {
        let mut inner = self.lock();

        let Some(sink) = inner.sink.as_mut() else {
            trace!(len = chunk.len(), "data event after teardown, chunk dropped");
            return;
        };

        if !sink.write(chunk) {
            let controller = inner.controller.clone();
            drop(inner);
            if let Some(controller) = controller {
                controller.pause();
            }
        }
    }

    /// The transport delivered the last byte, plus any trailing metadata.
    ///
    /// Completion is not signaled here: the sink may still need to flush, so
    /// the exchange finishes when the sink reports its own terminal state.
    pub fn on_complete(&self, trailers: HeaderMap) {
        let mut inner = self.lock();
        inner.trailers = Some(trailers);

        if inner.sink.is_none() {
            debug!(state = ?inner.state, "complete event without sink, ignored");
            return;
        }

        inner.state = ExchangeState::Finalizing;
        if let Some(sink) = inner.sink.as_mut() {
            sink.end();
        }
    }

    /// The transport failed. Terminal from any state.
    ///
    /// With a sink installed, teardown flows through the sink's finished
    /// notification so completion stays single-sourced. Without one, the
    /// callback is delivered on the next scheduling tick, never synchronously
    /// out of this call.
    pub fn on_error(&self, err: StreamError) {
        let mut inner = self.lock();

        if inner.state == ExchangeState::Done {
            debug!(cause = %err, "error event after teardown, ignored");
            return;
        }

        // A failed exchange must never start a sink afterwards.
        inner.factory = None;
        inner.state = ExchangeState::Done;

        if let Some(mut sink) = inner.sink.take() {
            let notifier = inner.notifier.clone();
            drop(inner);

            debug!(cause = %err, "destroying sink after transport error");
            sink.destroy(Some(&err));
            notifier.finished(Some(err));
        } else if let Some(callback) = inner.callback.take() {
            inner.controller = None;
            drop(inner);

            debug!(cause = %err, "failing exchange before sink creation");
            tokio::spawn(async move {
                callback(Err(err));
            });
        }
    }

    fn spawn_driver(&self, mut events: mpsc::UnboundedReceiver<SinkEvent>) {
        let handler = self.clone();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    SinkEvent::Drained => {
                        let controller = handler.lock().controller.clone();
                        if let Some(controller) = controller {
                            controller.resume();
                        }
                    }
                    SinkEvent::Finished(err) => {
                        handler.finalize(err);
                        break;
                    }
                }
            }
        });
    }

    /// Runs once, on the sink's first terminal notification.
    fn finalize(&self, err: Option<StreamError>) {
        let mut inner = self.lock();
        let sink = inner.sink.take();
        let controller = inner.controller.take();
        let callback = inner.callback.take();
        let token = Arc::clone(&inner.token);
        let trailers = inner.trailers.take().unwrap_or_default();
        inner.state = ExchangeState::Done;
        drop(inner);

        if let Some(mut sink) = sink {
            if err.is_some() || !sink.is_drained() {
                sink.destroy(err.as_ref());
            }
        }

        match err {
            Some(err) => {
                if let Some(controller) = &controller {
                    controller.signal_error(&err);
                }
                if let Some(callback) = callback {
                    debug!(cause = %err, "exchange failed");
                    callback(Err(err));
                }
            }
            None => {
                if let Some(callback) = callback {
                    trace!("exchange finished");
                    callback(Ok(StreamFinished { token, trailers }));
                }
            }
        }
    }
}

impl fmt::Debug for StreamHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("StreamHandler")
            .field("state", &inner.state)
            .field("has_sink", &inner.sink.is_some())
            .field("has_callback", &inner.callback.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BoxError;
    use crate::transport::MockFlowControl;
    use futures::channel::oneshot;
    use http::header::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type EventLog = Arc<Mutex<Vec<String>>>;

    fn log_of(log: &EventLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// Scripted sink recording every interaction into a shared log.
    struct TestSink {
        log: EventLog,
        notifier_slot: Arc<Mutex<Option<SinkNotifier>>>,
        accept: usize,
        written: usize,
        finish_on_end: bool,
        drained: bool,
        reject_subscribe: bool,
    }

    impl TestSink {
        fn new(log: &EventLog) -> Self {
            Self {
                log: Arc::clone(log),
                notifier_slot: Arc::new(Mutex::new(None)),
                accept: usize::MAX,
                written: 0,
                finish_on_end: true,
                drained: true,
                reject_subscribe: false,
            }
        }

        fn notifier_slot(&self) -> Arc<Mutex<Option<SinkNotifier>>> {
            Arc::clone(&self.notifier_slot)
        }
    }

    impl ResponseSink for TestSink {
        fn write(&mut self, chunk: Bytes) -> bool {
            self.written += 1;
            self.log.lock().unwrap().push(format!("write:{}", String::from_utf8_lossy(&chunk)));
            self.written <= self.accept
        }

        fn end(&mut self) {
            self.log.lock().unwrap().push("end".to_string());
            if self.finish_on_end {
                if let Some(notifier) = self.notifier_slot.lock().unwrap().as_ref() {
                    notifier.finished(None);
                }
            }
        }

        fn subscribe(&mut self, notifier: SinkNotifier) -> Result<(), BoxError> {
            if self.reject_subscribe {
                return Err("no subscription support".into());
            }
            *self.notifier_slot.lock().unwrap() = Some(notifier);
            Ok(())
        }

        fn destroy(&mut self, err: Option<&StreamError>) {
            let cause = err.map_or_else(|| "none".to_string(), ToString::to_string);
            self.log.lock().unwrap().push(format!("destroy:{cause}"));
        }

        fn is_drained(&self) -> bool {
            self.drained
        }
    }

    /// Flow controller recording its invocations into the shared log.
    struct RecordingControl {
        log: EventLog,
    }

    impl FlowControl for RecordingControl {
        fn pause(&self) {
            self.log.lock().unwrap().push("pause".to_string());
        }

        fn resume(&self) {
            self.log.lock().unwrap().push("resume".to_string());
        }

        fn signal_error(&self, err: &StreamError) {
            self.log.lock().unwrap().push(format!("signal_error:{err}"));
        }
    }

    fn handler_with_sink(
        sink: TestSink,
    ) -> (StreamHandler, oneshot::Receiver<Result<StreamFinished, StreamError>>) {
        let (tx, rx) = oneshot::channel();
        let callback: CompletionCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });
        let mut sink = Some(sink);
        let factory: SinkFactory =
            Box::new(move |_req| Ok(Box::new(sink.take().expect("factory ran twice")) as Box<dyn ResponseSink>));
        (StreamHandler::new(Arc::new(41_u32), factory, callback), rx)
    }

    fn trailers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_static(value));
        map
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn success_path_completes_once_after_end() {
        let log = EventLog::default();
        let (handler, rx) = handler_with_sink(TestSink::new(&log));

        // the happy path must never touch the flow controller
        handler.on_connect(Arc::new(MockFlowControl::new()));
        handler.on_headers(StatusCode::OK, HeaderMap::new()).expect("headers accepted");
        handler.on_data(Bytes::from_static(b"ab"));
        handler.on_data(Bytes::from_static(b"cd"));
        handler.on_complete(trailers("x", "1"));

        let finished = rx.await.expect("callback invoked").expect("exchange succeeded");
        assert_eq!(finished.trailers.get("x").unwrap(), "1");
        assert_eq!(finished.token.downcast_ref::<u32>(), Some(&41));
        assert_eq!(log_of(&log), vec!["write:ab", "write:cd", "end"]);
    }

    #[tokio::test]
    async fn informational_headers_are_transparent() {
        let log = EventLog::default();
        let (handler, rx) = handler_with_sink(TestSink::new(&log));

        handler.on_connect(Arc::new(MockFlowControl::new()));
        handler.on_headers(StatusCode::CONTINUE, HeaderMap::new()).expect("1xx tolerated");
        assert!(log_of(&log).is_empty());

        handler.on_headers(StatusCode::OK, HeaderMap::new()).expect("headers accepted");
        handler.on_complete(HeaderMap::new());

        let finished = rx.await.expect("callback invoked").expect("exchange succeeded");
        assert!(finished.trailers.is_empty());
    }

    #[tokio::test]
    async fn backpressure_pauses_then_resumes_on_drained() {
        let log = EventLog::default();
        let mut sink = TestSink::new(&log);
        sink.accept = 1;
        let slot = sink.notifier_slot();
        let (handler, rx) = handler_with_sink(sink);

        handler.on_connect(Arc::new(RecordingControl { log: Arc::clone(&log) }));
        handler.on_headers(StatusCode::OK, HeaderMap::new()).expect("headers accepted");
        handler.on_data(Bytes::from_static(b"a"));
        handler.on_data(Bytes::from_static(b"b"));

        assert_eq!(log_of(&log), vec!["write:a", "write:b", "pause"]);

        let notifier = slot.lock().unwrap().clone().expect("sink subscribed");
        notifier.drained();
        settle().await;
        assert_eq!(log_of(&log), vec!["write:a", "write:b", "pause", "resume"]);

        handler.on_complete(HeaderMap::new());
        rx.await.expect("callback invoked").expect("exchange succeeded");
    }

    #[tokio::test]
    async fn transport_error_after_headers_destroys_sink() {
        let log = EventLog::default();
        let (handler, rx) = handler_with_sink(TestSink::new(&log));

        handler.on_connect(Arc::new(RecordingControl { log: Arc::clone(&log) }));
        handler.on_headers(StatusCode::OK, HeaderMap::new()).expect("headers accepted");
        handler.on_error(StreamError::transport("connection reset"));

        let err = rx.await.expect("callback invoked").expect_err("exchange failed");
        assert!(matches!(err, StreamError::Transport { .. }));
        assert_eq!(log_of(&log)[0], "destroy:transport error: connection reset");
    }

    #[tokio::test]
    async fn error_before_sink_defers_callback_and_blocks_headers() {
        let log = EventLog::default();
        let (handler, rx) = handler_with_sink(TestSink::new(&log));

        handler.on_connect(Arc::new(MockFlowControl::new()));
        handler.on_error(StreamError::transport("dns failure"));

        let err = rx.await.expect("callback invoked").expect_err("exchange failed");
        assert!(matches!(err, StreamError::Transport { .. }));

        // the factory reference is cleared, a late headers event starts nothing
        handler.on_headers(StatusCode::OK, HeaderMap::new()).expect("late headers ignored");
        handler.on_data(Bytes::from_static(b"late"));
        settle().await;
        assert!(log_of(&log).is_empty());
    }

    #[tokio::test]
    async fn repeated_terminal_events_complete_exactly_once() {
        let log = EventLog::default();
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        let callback: CompletionCallback = Box::new(move |_result| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut sink = Some(TestSink::new(&log));
        let factory: SinkFactory =
            Box::new(move |_req| Ok(Box::new(sink.take().expect("factory ran twice")) as Box<dyn ResponseSink>));
        let handler = StreamHandler::new(Arc::new(()), factory, callback);

        handler.on_connect(Arc::new(RecordingControl { log: Arc::clone(&log) }));
        handler.on_headers(StatusCode::OK, HeaderMap::new()).expect("headers accepted");
        handler.on_error(StreamError::transport("first failure"));
        handler.on_error(StreamError::transport("second failure"));
        handler.on_complete(HeaderMap::new());
        settle().await;

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn factory_failure_is_a_contract_error() {
        let (tx, rx) = oneshot::channel();
        let callback: CompletionCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });
        let factory: SinkFactory = Box::new(|_req| Err("not a writable sink".into()));
        let handler = StreamHandler::new(Arc::new(()), factory, callback);

        handler.on_connect(Arc::new(MockFlowControl::new()));
        let err = handler.on_headers(StatusCode::OK, HeaderMap::new()).expect_err("contract violated");
        assert!(err.is_invalid_return_value());

        // no partial sink exists, data events are dropped
        handler.on_data(Bytes::from_static(b"ab"));

        // the transport surfaces the synchronous fault as its own error
        handler.on_error(err);
        let err = rx.await.expect("callback invoked").expect_err("exchange failed");
        assert!(err.is_invalid_return_value());
    }

    #[tokio::test]
    async fn subscription_rejection_is_a_contract_error() {
        let log = EventLog::default();
        let mut sink = TestSink::new(&log);
        sink.reject_subscribe = true;
        let (handler, _rx) = handler_with_sink(sink);

        handler.on_connect(Arc::new(MockFlowControl::new()));
        let err = handler.on_headers(StatusCode::OK, HeaderMap::new()).expect_err("contract violated");
        assert!(err.is_invalid_return_value());
        assert_eq!(log_of(&log), vec!["destroy:none"]);
    }

    #[tokio::test]
    async fn abort_inside_factory_discards_the_produced_sink() {
        let log = EventLog::default();
        let (tx, rx) = oneshot::channel();
        let callback: CompletionCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });

        let sink_log = EventLog::default();
        let mut sink = Some(TestSink::new(&sink_log));
        let handler_slot: Arc<Mutex<Option<StreamHandler>>> = Arc::new(Mutex::new(None));
        let factory_handler = Arc::clone(&handler_slot);
        let factory: SinkFactory = Box::new(move |_req| {
            // the consumer cancels the exchange while the factory runs
            let aborting = factory_handler.lock().unwrap().clone().expect("handler installed");
            aborting.on_error(StreamError::transport("canceled"));
            Ok(Box::new(sink.take().expect("factory ran twice")) as Box<dyn ResponseSink>)
        });
        let handler = StreamHandler::new(Arc::new(()), factory, callback);
        *handler_slot.lock().unwrap() = Some(handler.clone());

        handler.on_connect(Arc::new(MockFlowControl::new()));
        handler.on_headers(StatusCode::OK, HeaderMap::new()).expect("abort is not an error");

        let err = rx.await.expect("callback invoked").expect_err("exchange canceled");
        assert!(matches!(err, StreamError::Transport { .. }));
        // the orphaned sink was torn down, never written to
        assert_eq!(log_of(&sink_log), vec!["destroy:none"]);
        assert!(log_of(&log).is_empty());
    }

    #[tokio::test]
    async fn sink_error_reaches_controller_and_callback() {
        let log = EventLog::default();
        let mut sink = TestSink::new(&log);
        sink.finish_on_end = false;
        let slot = sink.notifier_slot();
        let (handler, rx) = handler_with_sink(sink);

        handler.on_connect(Arc::new(RecordingControl { log: Arc::clone(&log) }));
        handler.on_headers(StatusCode::OK, HeaderMap::new()).expect("headers accepted");
        handler.on_data(Bytes::from_static(b"ab"));

        let notifier = slot.lock().unwrap().clone().expect("sink subscribed");
        notifier.finished(Some(StreamError::sink("disk full")));

        let err = rx.await.expect("callback invoked").expect_err("exchange failed");
        assert!(matches!(err, StreamError::Sink { .. }));

        let entries = log_of(&log);
        assert!(entries.contains(&"destroy:sink error: disk full".to_string()));
        assert!(entries.contains(&"signal_error:sink error: disk full".to_string()));
    }

    #[tokio::test]
    async fn undrained_sink_is_destroyed_on_success() {
        let log = EventLog::default();
        let mut sink = TestSink::new(&log);
        sink.drained = false;
        let (handler, rx) = handler_with_sink(sink);

        handler.on_connect(Arc::new(MockFlowControl::new()));
        handler.on_headers(StatusCode::OK, HeaderMap::new()).expect("headers accepted");
        handler.on_complete(HeaderMap::new());

        rx.await.expect("callback invoked").expect("exchange succeeded");
        assert_eq!(log_of(&log), vec!["end", "destroy:none"]);
    }
}
