//! Session and messaging error types.

use thiserror::Error;

use crate::gate::DenyReason;

/// Errors from session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Caller-supplied parameters are out of range.
    ///
    /// Rejected before any collaborator is contacted.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// Which parameter was rejected and why.
        reason: String,
    },

    /// The engine was unreachable, reported an error, or returned a
    /// malformed batch.
    #[error("backend error: {message}")]
    Backend {
        /// Error text from the engine or transport.
        message: String,
    },
}

impl SessionError {
    /// Whether re-issuing the same request may succeed.
    ///
    /// Backend failures are transient from the core's point of view. Nothing
    /// here retries automatically; this only informs caller policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }
}

/// Errors from [`MessagePipeline::send`](crate::MessagePipeline::send) and
/// message lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Plaintext is empty or whitespace only.
    #[error("message is empty")]
    EmptyMessage,

    /// The run has no sifted key.
    #[error("no quantum key available")]
    NoKey,

    /// The security gate refused. A policy decision, not a fault.
    #[error("security denied: {0}")]
    SecurityDenied(DenyReason),

    /// No message with this id exists.
    #[error("unknown message: {id}")]
    UnknownMessage {
        /// The requested id.
        id: u64,
    },
}

/// Why a message record ended in `Failed`.
///
/// Scoped to one record; never affects the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// The cipher collaborator failed to encrypt.
    #[error("encrypt error: {0}")]
    EncryptError(String),

    /// The cipher collaborator failed to decrypt.
    #[error("decrypt error: {0}")]
    DecryptError(String),
}
