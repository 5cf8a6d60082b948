use std::error::Error;
use thiserror::Error;

/// Boxed error type used at the trait seams of this crate.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Terminal error of a streaming exchange.
///
/// Every failed exchange is reported through exactly one of these variants,
/// either as a synchronous return from the entry point (argument errors), a
/// synchronous return out of [`StreamHandler::on_headers`] (contract errors),
/// or through the completion callback (transport and sink errors).
///
/// [`StreamHandler::on_headers`]: crate::exchange::StreamHandler::on_headers
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("invalid sink returned by factory: {reason}")]
    InvalidReturnValue { reason: String },

    #[error("transport error: {source}")]
    Transport { source: BoxError },

    #[error("sink error: {source}")]
    Sink { source: BoxError },
}

impl StreamError {
    pub fn invalid_argument<S: ToString>(str: S) -> Self {
        Self::InvalidArgument { reason: str.to_string() }
    }

    pub fn invalid_return_value<S: ToString>(str: S) -> Self {
        Self::InvalidReturnValue { reason: str.to_string() }
    }

    pub fn transport<E: Into<BoxError>>(e: E) -> Self {
        Self::Transport { source: e.into() }
    }

    pub fn sink<E: Into<BoxError>>(e: E) -> Self {
        Self::Sink { source: e.into() }
    }

    /// Whether this error was raised by the adapter's argument validation.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Whether this error was raised by the sink contract check.
    pub fn is_invalid_return_value(&self) -> bool {
        matches!(self, Self::InvalidReturnValue { .. })
    }
}
