//! Public entry points for running one streaming exchange.

use futures::channel::oneshot;
use http::Method;
use tracing::debug;

use crate::exchange::StreamHandler;
use crate::protocol::{BoxError, StreamError, StreamFinished, StreamRequest};
use crate::sink::{ResponseSink, SinkRequest};
use crate::transport::Transport;
use crate::ensure;

/// Runs one exchange, delivering the outcome through `callback`.
///
/// The factory is invoked once non-informational response headers arrive and
/// must produce the sink the body will be written into. The callback fires
/// exactly once, with the failure or with the correlation token and trailers;
/// it is never invoked before this function returns, even when `dispatch`
/// fails synchronously.
///
/// Must be called within a Tokio runtime: deferred callback delivery and sink
/// notification handling are scheduled on it.
///
/// # Errors
///
/// Returns [`StreamError::InvalidArgument`] synchronously for a `CONNECT`
/// request, before any transport interaction; `CONNECT` redefines the
/// response stream semantics and is categorically unsupported here. All other
/// failures are delivered through the callback.
pub fn stream_with_callback<T, F, C>(
    transport: &T,
    request: StreamRequest,
    factory: F,
    callback: C,
) -> Result<(), StreamError>
where
    T: Transport + ?Sized,
    F: FnOnce(SinkRequest) -> Result<Box<dyn ResponseSink>, BoxError> + Send + 'static,
    C: FnOnce(Result<StreamFinished, StreamError>) + Send + 'static,
{
    ensure!(request.method != Method::CONNECT, StreamError::invalid_argument("invalid method"));

    let handler =
        StreamHandler::new(request.token.clone(), Box::new(factory), Box::new(callback));

    if let Err(e) = transport.dispatch(request, handler.clone()) {
        debug!(cause = %e, "dispatch failed synchronously");
        handler.on_error(StreamError::transport(e));
    }

    Ok(())
}

/// Runs one exchange and resolves with the correlation token and trailers.
///
/// The future-shaped form of [`stream_with_callback`], wrapping a generated
/// callback through a oneshot channel.
///
/// # Errors
///
/// Rejects with the exchange's terminal [`StreamError`]; argument errors
/// surface before any transport interaction.
pub async fn stream<T, F>(
    transport: &T,
    request: StreamRequest,
    factory: F,
) -> Result<StreamFinished, StreamError>
where
    T: Transport + ?Sized,
    F: FnOnce(SinkRequest) -> Result<Box<dyn ResponseSink>, BoxError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    stream_with_callback(transport, request, factory, move |result| {
        let _ = tx.send(result);
    })?;

    match rx.await {
        Ok(result) => result,
        // the transport dropped the handler without any terminal event
        Err(_canceled) => Err(StreamError::transport("exchange dropped without completion")),
    }
}
