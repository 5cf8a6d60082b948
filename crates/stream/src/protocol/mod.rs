//! Core exchange types and error handling.
//!
//! This module provides the vocabulary shared by the adapter and its two
//! external collaborators, the transport and the sink factory:
//!
//! - **Request Description** ([`request`]): the caller's view of one exchange
//!   - [`StreamRequest`]: method, uri, headers and the opaque correlation token
//!
//! - **Completion Payload** ([`response`]): what the callback receives on success
//!   - [`StreamFinished`]: correlation token plus trailing metadata
//!
//! - **Error Handling** ([`error`]): the terminal error taxonomy
//!   - [`StreamError`]: argument, contract, transport and sink errors
//!   - [`BoxError`]: boxed error type used at trait seams

use std::any::Any;
use std::sync::Arc;

mod request;
pub use request::StreamRequest;

mod response;
pub use response::StreamFinished;

mod error;
pub use error::BoxError;
pub use error::StreamError;

/// Caller-supplied correlation token, echoed back on completion.
///
/// Shared (`Arc`) so the sink factory and the completion payload can both
/// carry it without imposing `Clone` on the caller's type. Downcast with
/// [`Any`] to recover the concrete value.
pub type OpaqueToken = Arc<dyn Any + Send + Sync>;
