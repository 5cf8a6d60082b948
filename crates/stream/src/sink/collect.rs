use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::protocol::{BoxError, StreamError};
use crate::sink::{ResponseSink, SinkNotifier};

#[derive(Debug, Default)]
struct CollectState {
    buffer: BytesMut,
    finished: bool,
    failed: Option<String>,
}

/// A ready-made sink that accumulates the whole body in memory.
///
/// Created as a pair: the [`CollectSink`] is handed to the adapter through
/// the factory, while the [`CollectHandle`] stays with the caller for
/// reading the collected bytes once the exchange completed.
///
/// The sink accepts every chunk without backpressure and reports finished
/// synchronously from `end`. It suits small bodies and tests; streaming
/// consumers should implement [`ResponseSink`] over their own output.
#[derive(Debug)]
pub struct CollectSink {
    shared: Arc<Mutex<CollectState>>,
    notifier: Option<SinkNotifier>,
}

/// Caller-side view of a [`CollectSink`].
#[derive(Debug, Clone)]
pub struct CollectHandle {
    shared: Arc<Mutex<CollectState>>,
}

impl CollectSink {
    pub fn pair() -> (CollectSink, CollectHandle) {
        let shared = Arc::new(Mutex::new(CollectState::default()));
        let sink = CollectSink { shared: Arc::clone(&shared), notifier: None };
        (sink, CollectHandle { shared })
    }
}

impl ResponseSink for CollectSink {
    fn write(&mut self, chunk: Bytes) -> bool {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        state.buffer.extend_from_slice(&chunk);
        true
    }

    fn end(&mut self) {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if state.finished {
            return;
        }
        state.finished = true;
        drop(state);

        if let Some(notifier) = &self.notifier {
            notifier.finished(None);
        }
    }

    fn subscribe(&mut self, notifier: SinkNotifier) -> Result<(), BoxError> {
        if self.notifier.is_some() {
            return Err("collect sink already subscribed".into());
        }
        self.notifier = Some(notifier);
        Ok(())
    }

    fn destroy(&mut self, err: Option<&StreamError>) {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if state.finished {
            return;
        }
        state.finished = true;
        state.failed = err.map(ToString::to_string);
        debug!(cause = ?state.failed, "collect sink destroyed before completion");
    }
}

impl CollectHandle {
    /// The bytes collected so far. Stable once the exchange completed.
    pub fn bytes(&self) -> Bytes {
        let state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        Bytes::copy_from_slice(&state.buffer)
    }

    /// Whether the sink reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner).finished
    }

    /// The teardown reason, when the sink was destroyed instead of ended.
    pub fn failure(&self) -> Option<String> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner).failed.clone()
    }
}
