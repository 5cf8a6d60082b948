//! The response sink contract.
//!
//! A sink is the consumer-constructed destination for response body bytes.
//! It is produced by the caller's factory once non-informational headers
//! arrive and is owned by the adapter for the rest of the exchange.
//!
//! # Architecture
//!
//! Sink signaling is channel based: the adapter hands the sink a
//! [`SinkNotifier`] (an unbounded mpsc sender) at subscription time, and the
//! sink reports `drained` and `finished` through it. Notifications are
//! consumed by a driver task, never re-entering the adapter synchronously
//! from inside `write` or `end`.
//!
//! # Contract
//!
//! - `write` accepts one chunk and returns `false` to request backpressure
//! - after `end()` the sink must eventually report [`SinkEvent::Finished`]
//! - after a pause-inducing `write`, the sink must report
//!   [`SinkEvent::Drained`] once it can accept data again
//! - `destroy` is best-effort teardown; a destroyed sink that has not yet
//!   finished should not report a successful finish afterwards
//! - the first `Finished` wins; later notifications are ignored

use bytes::Bytes;
use futures::channel::mpsc;
use http::{HeaderMap, StatusCode};
use std::fmt;

use crate::protocol::{BoxError, OpaqueToken, StreamError};

mod collect;
pub use collect::CollectHandle;
pub use collect::CollectSink;

/// What the factory sees when non-informational headers arrive.
pub struct SinkRequest {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub token: OpaqueToken,
}

impl fmt::Debug for SinkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkRequest")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Factory invoked at most once per exchange to construct the sink.
///
/// Returning `Err` means the factory cannot produce a conforming sink; the
/// adapter fails the exchange with
/// [`StreamError::InvalidReturnValue`](crate::protocol::StreamError).
pub type SinkFactory = Box<dyn FnOnce(SinkRequest) -> Result<Box<dyn ResponseSink>, BoxError> + Send>;

/// Notification emitted by a sink towards the adapter.
#[derive(Debug)]
pub enum SinkEvent {
    /// Backpressure relieved; the adapter resumes the transport.
    Drained,
    /// Terminal state, success (`None`) or failure (`Some`).
    Finished(Option<StreamError>),
}

/// Sending half of the sink notification channel.
///
/// Cheap to clone; sends never block and never fail visibly. A notifier
/// outliving its exchange is harmless: events sent after the exchange
/// finished are dropped with the receiver.
#[derive(Debug, Clone)]
pub struct SinkNotifier {
    sender: mpsc::UnboundedSender<SinkEvent>,
}

impl SinkNotifier {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self { sender }, receiver)
    }

    /// Report that backpressure has been relieved.
    pub fn drained(&self) {
        let _ = self.sender.unbounded_send(SinkEvent::Drained);
    }

    /// Report the sink's terminal state. The first report wins.
    pub fn finished(&self, err: Option<StreamError>) {
        let _ = self.sender.unbounded_send(SinkEvent::Finished(err));
    }
}

/// Consumer-supplied destination for response body bytes.
///
/// `write` and `end` are carried statically by the trait; the remaining
/// runtime contract surface is the factory and
/// [`subscribe`](ResponseSink::subscribe) returning `Err`. Either fails the
/// exchange with `InvalidReturnValue` before any body bytes are forwarded.
pub trait ResponseSink: Send {
    /// Accepts one chunk of body data.
    ///
    /// Returns `false` to request backpressure; the adapter then pauses the
    /// transport until the sink reports [`SinkEvent::Drained`].
    fn write(&mut self, chunk: Bytes) -> bool;

    /// No further chunks will arrive.
    ///
    /// Triggers the sink's own completion path; the sink must eventually
    /// report [`SinkEvent::Finished`], possibly after flushing buffered data.
    fn end(&mut self);

    /// Registers the adapter's notification channel.
    ///
    /// Called exactly once, before any `write`. Returning `Err` means the
    /// sink cannot deliver notifications and fails the exchange with
    /// `InvalidReturnValue`.
    fn subscribe(&mut self, notifier: SinkNotifier) -> Result<(), BoxError>;

    /// Best-effort forced teardown, with the failure reason when one exists.
    ///
    /// Idempotent; safe to call on an already-finished sink.
    fn destroy(&mut self, _err: Option<&StreamError>) {}

    /// Whether the sink holds no unflushed or readable data.
    ///
    /// Consulted once, after the sink reported finished. Sinks with internal
    /// buffering or a readable side can return `false` to have the adapter
    /// tear them down instead of leaving a half-open side alive.
    fn is_drained(&self) -> bool {
        true
    }
}
