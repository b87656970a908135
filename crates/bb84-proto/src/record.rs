//! Exchange records and the request/response types around them.

use std::fmt;

use crate::{Basis, Bit};

/// Outcome of sending one qubit from sender to receiver.
///
/// Immutable once built. The interceptor bit is present exactly when the
/// qubit was intercepted, and whether the bases match is derived from the
/// two bases rather than stored, so neither flag can disagree with the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeRecord {
    sender_bit: Bit,
    sender_basis: Basis,
    receiver_basis: Basis,
    receiver_bit: Bit,
    interceptor_bit: Option<Bit>,
}

impl ExchangeRecord {
    /// Build a record. `interceptor_bit` is `None` when not intercepted.
    pub fn new(
        sender_bit: Bit,
        sender_basis: Basis,
        receiver_basis: Basis,
        receiver_bit: Bit,
        interceptor_bit: Option<Bit>,
    ) -> Self {
        Self { sender_bit, sender_basis, receiver_basis, receiver_bit, interceptor_bit }
    }

    /// Bit the sender encoded.
    pub fn sender_bit(&self) -> Bit {
        self.sender_bit
    }

    /// Basis the sender encoded in.
    pub fn sender_basis(&self) -> Basis {
        self.sender_basis
    }

    /// Basis the receiver measured in.
    pub fn receiver_basis(&self) -> Basis {
        self.receiver_basis
    }

    /// Bit the receiver measured.
    pub fn receiver_bit(&self) -> Bit {
        self.receiver_bit
    }

    /// Bit the interceptor measured, if it intercepted this qubit.
    pub fn interceptor_bit(&self) -> Option<Bit> {
        self.interceptor_bit
    }

    /// Whether the interceptor measured this qubit.
    pub fn intercepted(&self) -> bool {
        self.interceptor_bit.is_some()
    }

    /// Whether sender and receiver used the same basis.
    pub fn bases_match(&self) -> bool {
        self.sender_basis == self.receiver_basis
    }
}

/// Values the engine computed itself alongside the raw records.
///
/// Kept for cross-checking only; the core derives its own keys and metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportedResults {
    /// Sender bits at basis-matched positions.
    pub sifted_key: Vec<Bit>,
    /// Receiver bits at basis-matched positions.
    pub receiver_key: Vec<Bit>,
    /// Interceptor bits as the engine chose to report them.
    pub interceptor_key: Vec<Bit>,
    /// Engine's error-rate estimate as a fraction in `[0, 1]`.
    pub error_rate: f64,
}

/// A complete, ordered batch returned by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeBatch {
    /// Records in exchange order.
    pub records: Vec<ExchangeRecord>,
    /// Engine-side derived values.
    pub reported: ReportedResults,
}

impl ExchangeBatch {
    /// Batch with no engine-side derived values.
    pub fn from_records(records: Vec<ExchangeRecord>) -> Self {
        Self { records, reported: ReportedResults::default() }
    }
}

/// Parameters forwarded to the batch-generation collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchRequest {
    /// Number of qubits to exchange.
    pub particle_count: u32,
    /// Probability that the interceptor measures any given qubit.
    pub interception_probability: f64,
    /// Opaque flag selecting real hardware in the engine.
    pub hardware_mode: bool,
}

/// Opaque ciphertext produced by the cipher collaborator.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ciphertext(String);

impl Ciphertext {
    /// Wrap an opaque ciphertext string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The opaque string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ciphertext").field(&format!("<{} chars>", self.0.len())).finish()
    }
}

impl fmt::Display for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bases_match_is_derived() {
        let matched =
            ExchangeRecord::new(Bit::One, Basis::Diagonal, Basis::Diagonal, Bit::One, None);
        let unmatched =
            ExchangeRecord::new(Bit::One, Basis::Diagonal, Basis::Rectilinear, Bit::Zero, None);

        assert!(matched.bases_match());
        assert!(!unmatched.bases_match());
    }

    #[test]
    fn interception_follows_interceptor_bit() {
        let record = ExchangeRecord::new(
            Bit::Zero,
            Basis::Rectilinear,
            Basis::Rectilinear,
            Bit::One,
            Some(Bit::One),
        );
        assert!(record.intercepted());
        assert_eq!(record.interceptor_bit(), Some(Bit::One));
    }

    #[test]
    fn ciphertext_debug_is_redacted() {
        let ciphertext = Ciphertext::new("c2VjcmV0");
        assert_eq!(format!("{ciphertext:?}"), "Ciphertext(\"<8 chars>\")");
    }
}
