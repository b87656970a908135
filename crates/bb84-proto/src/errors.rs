//! Wire translation errors.

use thiserror::Error;

/// Errors raised while translating collaborator payloads into the data model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// A bit field held something other than 0 or 1.
    #[error("invalid bit value: {value}")]
    InvalidBit {
        /// The offending value.
        value: u64,
    },

    /// A basis label matched neither basis.
    #[error("invalid basis label: {label:?}")]
    InvalidBasis {
        /// The offending label.
        label: String,
    },

    /// A row's flags contradict its own contents.
    #[error("inconsistent row {index}: {reason}")]
    InconsistentRow {
        /// Zero-based row index in the batch.
        index: usize,
        /// What disagreed.
        reason: String,
    },

    /// The batch does not contain the requested number of records.
    #[error("batch length mismatch: requested {expected}, received {actual}")]
    BatchLength {
        /// Requested particle count.
        expected: usize,
        /// Rows actually returned.
        actual: usize,
    },

    /// The collaborator answered with an explicit error field.
    #[error("collaborator reported: {message}")]
    Reported {
        /// Message carried by the error field.
        message: String,
    },

    /// A required field was absent.
    #[error("missing field: {field}")]
    MissingField {
        /// Field name.
        field: &'static str,
    },

    /// Opaque payload could not be encoded or decoded.
    #[error("malformed payload: {reason}")]
    Malformed {
        /// Parser message.
        reason: String,
    },
}
