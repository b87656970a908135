//! Runtime error types.

use bb84_core::{MessageError, SessionError};
use thiserror::Error;

/// Errors surfaced through [`RuntimeHandle`](crate::RuntimeHandle).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The session controller rejected the request.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The message pipeline rejected the request.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// The runtime task has stopped.
    #[error("runtime stopped")]
    Stopped,
}

impl RuntimeError {
    /// Whether the runtime can no longer accept commands.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}
