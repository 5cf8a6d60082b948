//! The stream adapter state machine.
//!
//! One [`StreamHandler`] exists per exchange. It is handed to the transport
//! by the entry point, receives the pushed lifecycle events, and reconciles
//! them with the consumer sink's backpressure and completion notifications.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Connected → Streaming → Finalizing → Done
//! ```
//!
//! `Done` is reached through success or through any error path, whichever
//! occurs first; after that every further event degrades to a no-op and the
//! completion callback can never fire again.

mod handler;
pub use handler::CompletionCallback;
pub use handler::StreamHandler;
