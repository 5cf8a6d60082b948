//! Request description for one streaming exchange.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, Method, Uri};

use crate::protocol::OpaqueToken;

/// Describes the request side of one exchange.
///
/// The adapter never interprets `method`, `uri` or `headers` beyond the
/// CONNECT check at the entry point; they are carried verbatim to the
/// transport's `dispatch`. The correlation token is opaque to both the
/// adapter and the transport and is echoed back unchanged in
/// [`StreamFinished`](crate::protocol::StreamFinished).
pub struct StreamRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub token: OpaqueToken,
}

impl StreamRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self { method, uri, headers: HeaderMap::new(), token: Arc::new(()) }
    }

    /// Attaches an opaque correlation token, echoed back on completion.
    #[must_use]
    pub fn with_token<T: Any + Send + Sync>(mut self, token: T) -> Self {
        self.token = Arc::new(token);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
