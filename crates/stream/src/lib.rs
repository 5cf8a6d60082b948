//! An asynchronous micro response-streaming adapter
//!
//! This crate converts a callback-driven HTTP transport interface (connection
//! lifecycle events delivered as they occur on the wire) into one coherent
//! contract for the caller: hand over a sink factory for the response body,
//! get called back exactly once when the exchange finished or failed.
//!
//! It deliberately does *not* parse HTTP, manage sockets or implement
//! retries. The transport stays an opaque dispatcher; this crate mediates one
//! in-flight exchange between that push-based producer and a
//! backpressure-aware consumer.
//!
//! # Features
//!
//! - Exactly-once completion notification, under every interleaving of
//!   success, abort and transport error
//! - Backpressure coupling: the transport's delivery rate is throttled by the
//!   sink's consumption rate through pause/resume signaling
//! - Transparent handling of informational (1xx) responses
//! - Deterministic teardown: all per-exchange references are cleared on the
//!   first terminal event
//! - Callback-shaped and future-shaped entry points
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use http::{HeaderMap, Method, StatusCode, Uri};
//! use micro_stream::exchange::StreamHandler;
//! use micro_stream::protocol::{BoxError, StreamError, StreamRequest};
//! use micro_stream::sink::{CollectSink, ResponseSink};
//! use micro_stream::transport::{FlowControl, Transport};
//!
//! struct NoopControl;
//!
//! impl FlowControl for NoopControl {
//!     fn pause(&self) {}
//!     fn resume(&self) {}
//!     fn signal_error(&self, _err: &StreamError) {}
//! }
//!
//! /// A toy transport replaying a canned response.
//! struct CannedTransport;
//!
//! impl Transport for CannedTransport {
//!     fn dispatch(&self, _request: StreamRequest, handler: StreamHandler) -> Result<(), BoxError> {
//!         handler.on_connect(Arc::new(NoopControl));
//!         handler.on_headers(StatusCode::OK, HeaderMap::new())?;
//!         handler.on_data("Hello World!".into());
//!         handler.on_complete(HeaderMap::new());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let request = StreamRequest::new(Method::GET, Uri::from_static("http://localhost/hello"));
//!
//!     let (sink, handle) = CollectSink::pair();
//!     let finished = micro_stream::stream(&CannedTransport, request, move |_info| {
//!         Ok(Box::new(sink) as Box<dyn ResponseSink>)
//!     })
//!     .await
//!     .expect("exchange failed");
//!
//!     assert_eq!(handle.bytes().as_ref(), b"Hello World!");
//!     println!("trailers: {:?}", finished.trailers);
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`client`]: The public entry points, [`stream`] and
//!   [`stream_with_callback`], plus argument validation
//! - [`exchange`]: The per-exchange state machine driving the whole flow
//! - [`sink`]: The response sink contract the consumer's factory must satisfy
//! - [`transport`]: The dispatch boundary and the flow-control capability set
//! - [`protocol`]: Shared exchange types and the error taxonomy
//!
//! # Exchange Flow
//!
//! The transport pushes events for one exchange in the fixed order
//! connect → headers → (data)* → complete, with error possible at any point.
//! The adapter turns these into sink operations and turns the sink's drained
//! and finished notifications back into flow-control signals and, finally,
//! the single completion callback.
//!
//! # Error Handling
//!
//! Four terminal categories, each delivered exactly once and never twice
//! ([`protocol::StreamError`]): argument errors (synchronous, before any
//! transport interaction), sink contract errors (synchronous out of the
//! headers transition), transport errors and sink errors (both through the
//! completion callback).
//!
//! # Limitations
//!
//! - One exchange per handler; connection pooling and retries belong to the
//!   transport
//! - `CONNECT` requests are rejected up front
//! - Request bodies are out of scope; the request side is description only

pub mod client;
pub mod exchange;
pub mod protocol;
pub mod sink;
pub mod transport;

mod utils;
pub(crate) use utils::ensure;

pub use client::stream;
pub use client::stream_with_callback;
