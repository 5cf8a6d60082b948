//! The dispatch boundary between the adapter and the underlying transport.
//!
//! The transport owns everything this crate deliberately does not: connection
//! pooling, TCP/TLS, HTTP parsing and retry policy. The adapter sees it
//! through exactly one operation, [`Transport::dispatch`], and receives two
//! capabilities back from it while an exchange runs:
//!
//! - the event pushes on [`StreamHandler`](crate::exchange::StreamHandler),
//!   delivered as plain method calls in wire order
//! - a per-exchange [`FlowControl`] handed over in `on_connect`, through which
//!   the adapter throttles delivery and reports consumer-side failures

use crate::exchange::StreamHandler;
use crate::protocol::{BoxError, StreamError, StreamRequest};

/// Per-exchange backpressure and error-signaling capability set.
///
/// Supplied by the transport when the connection is established. The adapter
/// only ever invokes these operations; it never implements or synthesizes a
/// controller itself.
///
/// A `pause` is eventually matched by exactly one `resume`, triggered by the
/// sink's drained notification. The adapter never resumes speculatively.
#[cfg_attr(test, mockall::automock)]
pub trait FlowControl: Send + Sync {
    /// Stop delivering body bytes until resumed.
    fn pause(&self);

    /// Resume body delivery after a pause.
    fn resume(&self);

    /// The consumer side failed; the transport may abort the exchange.
    fn signal_error(&self, err: &StreamError);
}

/// The opaque dispatcher for one in-flight exchange.
///
/// `dispatch` hands the request and a [`StreamHandler`] to the transport and
/// returns. From then on the transport pushes lifecycle events into the
/// handler in the fixed order connect → headers → (data)* → complete, with
/// `on_error` possible at any point.
///
/// Two duties fall on implementations:
///
/// - an `Err` returned synchronously from `dispatch` is routed by the entry
///   point through `on_error`, so implementations must not *also* push an
///   `on_error` for the same failure
/// - an `Err` returned from [`on_headers`] is a fault of the transport's own
///   exchange: the transport must surface it through `on_error` on itself
///   (with the returned error as the cause) rather than swallow it
///
/// [`on_headers`]: crate::exchange::StreamHandler::on_headers
pub trait Transport {
    fn dispatch(&self, request: StreamRequest, handler: StreamHandler) -> Result<(), BoxError>;
}
