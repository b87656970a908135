//! External collaborator boundary.
//!
//! The runtime depends on exactly three remote operations: batch generation,
//! encryption and decryption. Implementations translate their own transport
//! and payload shapes into the typed values here.

use async_trait::async_trait;
use bb84_proto::{BatchRequest, Bit, Ciphertext, ExchangeBatch, ProtoError};
use thiserror::Error;

/// Errors from collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The collaborator could not be reached.
    #[error("connection failed: {reason}")]
    Connection {
        /// Transport error text.
        reason: String,
    },

    /// The request failed in transit or timed out.
    #[error("request failed: {reason}")]
    Request {
        /// Transport error text.
        reason: String,
    },

    /// The response body was not the expected JSON.
    #[error("failed to parse response: {reason}")]
    Parse {
        /// Decoder error text.
        reason: String,
    },

    /// The collaborator answered with an explicit error.
    #[error("{message}")]
    Rejected {
        /// Error text from the collaborator.
        message: String,
    },

    /// The response parsed but contradicts itself.
    #[error("malformed response: {0}")]
    Malformed(ProtoError),
}

impl From<ProtoError> for CollaboratorError {
    fn from(error: ProtoError) -> Self {
        match error {
            ProtoError::Reported { message } => Self::Rejected { message },
            other => Self::Malformed(other),
        }
    }
}

/// Produces exchange batches.
#[async_trait]
pub trait ExchangeEngine: Send + Sync + 'static {
    /// Run one exchange and return every record in order.
    ///
    /// # Errors
    ///
    /// Any failure; the run fails with its message.
    async fn generate(&self, request: &BatchRequest) -> Result<ExchangeBatch, CollaboratorError>;
}

/// Symmetric cipher keyed by a sifted key.
#[async_trait]
pub trait CipherProvider: Send + Sync + 'static {
    /// Encrypt `plaintext` under `key`.
    async fn encrypt(&self, plaintext: &str, key: &[Bit]) -> Result<Ciphertext, CollaboratorError>;

    /// Decrypt `ciphertext` under `key`.
    async fn decrypt(&self, ciphertext: &Ciphertext, key: &[Bit])
    -> Result<String, CollaboratorError>;
}
