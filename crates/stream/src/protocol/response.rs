//! Success payload of a completed exchange.

use std::fmt;

use http::HeaderMap;

use crate::protocol::OpaqueToken;

/// Delivered to the completion callback when an exchange ends successfully.
///
/// Carries the caller's correlation token back together with any trailing
/// metadata the transport produced after the body.
pub struct StreamFinished {
    pub token: OpaqueToken,
    pub trailers: HeaderMap,
}

impl fmt::Debug for StreamFinished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFinished").field("trailers", &self.trailers).finish_non_exhaustive()
    }
}
