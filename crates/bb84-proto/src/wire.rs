//! JSON payloads exchanged with the engine and cipher collaborators.
//!
//! Field names follow the engine's table format, which keys rows by display
//! column names. Nothing outside this module depends on those names.
//!
//! # Invariants
//!
//! - A translated row never carries an interceptor bit unless its
//!   intercepted flag says `Yes`, and always carries one when it does.
//! - A translated row's match flag agrees with its two bases.
//! - A translated batch has exactly the requested number of records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    BatchRequest, Bit, Ciphertext, ExchangeBatch, ExchangeRecord, ProtoError, ReportedResults,
    bit::Basis,
};

const YES: &str = "Yes";
const NO: &str = "No";
const NOT_INTERCEPTED: &str = "-";

/// Body of the batch-generation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WireBatchRequest {
    /// Number of qubits.
    pub n_bits: u32,
    /// Interception probability in `[0, 1]`.
    pub eve_prob: f64,
    /// Run on real hardware instead of the simulator.
    pub use_real: bool,
}

impl From<&BatchRequest> for WireBatchRequest {
    fn from(request: &BatchRequest) -> Self {
        Self {
            n_bits: request.particle_count,
            eve_prob: request.interception_probability,
            use_real: request.hardware_mode,
        }
    }
}

/// Interceptor bit column: a bit, or a sentinel string for "not intercepted".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireInterceptorBit {
    /// Measured bit.
    Bit(u8),
    /// Sentinel (the engine sends `"-"`).
    Sentinel(String),
}

/// One row of the engine's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRow {
    /// Sender bit.
    #[serde(rename = "Alice Bit")]
    pub sender_bit: u8,
    /// Sender basis label.
    #[serde(rename = "Alice Basis")]
    pub sender_basis: String,
    /// Receiver basis label.
    #[serde(rename = "Bob Basis")]
    pub receiver_basis: String,
    /// `"Yes"` when intercepted.
    #[serde(rename = "Eve Intercepting")]
    pub intercepted: String,
    /// Interceptor bit or sentinel.
    #[serde(rename = "Eve Bit")]
    pub interceptor_bit: WireInterceptorBit,
    /// Receiver measured bit.
    #[serde(rename = "Bob Measured Bit")]
    pub receiver_bit: u8,
    /// `"Yes"` when the bases matched.
    #[serde(rename = "Match")]
    pub bases_match: String,
}

impl WireRow {
    /// Translate a row into a verified record.
    pub fn to_record(&self, index: usize) -> Result<ExchangeRecord, ProtoError> {
        let sender_bit = Bit::try_from(self.sender_bit)?;
        let receiver_bit = Bit::try_from(self.receiver_bit)?;
        let sender_basis = Basis::parse_label(&self.sender_basis)?;
        let receiver_basis = Basis::parse_label(&self.receiver_basis)?;
        let intercepted = parse_flag(&self.intercepted, index, "Eve Intercepting")?;
        let claimed_match = parse_flag(&self.bases_match, index, "Match")?;

        let interceptor_bit = match (intercepted, &self.interceptor_bit) {
            (true, WireInterceptorBit::Bit(value)) => Some(Bit::try_from(*value)?),
            (false, WireInterceptorBit::Sentinel(_)) => None,
            (true, WireInterceptorBit::Sentinel(_)) => {
                return Err(ProtoError::InconsistentRow {
                    index,
                    reason: "intercepted row carries no interceptor bit".to_string(),
                });
            },
            (false, WireInterceptorBit::Bit(_)) => {
                return Err(ProtoError::InconsistentRow {
                    index,
                    reason: "row not intercepted but carries an interceptor bit".to_string(),
                });
            },
        };

        let record = ExchangeRecord::new(
            sender_bit,
            sender_basis,
            receiver_basis,
            receiver_bit,
            interceptor_bit,
        );

        if record.bases_match() != claimed_match {
            return Err(ProtoError::InconsistentRow {
                index,
                reason: format!(
                    "match flag {} contradicts bases {} / {}",
                    self.bases_match, sender_basis, receiver_basis
                ),
            });
        }

        Ok(record)
    }

    /// Render a record in the engine's row format.
    pub fn from_record(record: &ExchangeRecord) -> Self {
        Self {
            sender_bit: record.sender_bit().as_u8(),
            sender_basis: record.sender_basis().label().to_string(),
            receiver_basis: record.receiver_basis().label().to_string(),
            intercepted: flag(record.intercepted()).to_string(),
            interceptor_bit: match record.interceptor_bit() {
                Some(bit) => WireInterceptorBit::Bit(bit.as_u8()),
                None => WireInterceptorBit::Sentinel(NOT_INTERCEPTED.to_string()),
            },
            receiver_bit: record.receiver_bit().as_u8(),
            bases_match: flag(record.bases_match()).to_string(),
        }
    }
}

/// Body of the batch-generation response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Rows in exchange order.
    #[serde(default)]
    pub table_data: Vec<WireRow>,
    /// Engine's sifted sender key.
    #[serde(default)]
    pub alice_key: Vec<u8>,
    /// Engine's sifted receiver key.
    #[serde(default)]
    pub bob_key: Vec<u8>,
    /// Engine's error-rate fraction.
    #[serde(default)]
    pub qber: f64,
    /// Interceptor key as reported by the engine.
    #[serde(default)]
    pub eve_key: Vec<u8>,
    /// Indices of basis-matched rows.
    #[serde(default)]
    pub matched_indices: Vec<usize>,
    /// Explicit failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResponse {
    /// Translate the response into a verified batch of `expected` records.
    pub fn into_batch(self, expected: usize) -> Result<ExchangeBatch, ProtoError> {
        if let Some(message) = self.error {
            return Err(ProtoError::Reported { message });
        }

        if self.table_data.len() != expected {
            return Err(ProtoError::BatchLength { expected, actual: self.table_data.len() });
        }

        let records = self
            .table_data
            .iter()
            .enumerate()
            .map(|(index, row)| row.to_record(index))
            .collect::<Result<Vec<_>, _>>()?;

        let reported = ReportedResults {
            sifted_key: to_bits(&self.alice_key)?,
            receiver_key: to_bits(&self.bob_key)?,
            interceptor_key: to_bits(&self.eve_key)?,
            error_rate: self.qber,
        };

        Ok(ExchangeBatch { records, reported })
    }

    /// Render a batch in the engine's response format.
    pub fn from_batch(batch: &ExchangeBatch) -> Self {
        Self {
            table_data: batch.records.iter().map(WireRow::from_record).collect(),
            alice_key: batch.reported.sifted_key.iter().map(|b| b.as_u8()).collect(),
            bob_key: batch.reported.receiver_key.iter().map(|b| b.as_u8()).collect(),
            qber: batch.reported.error_rate,
            eve_key: batch.reported.interceptor_key.iter().map(|b| b.as_u8()).collect(),
            matched_indices: batch
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.bases_match())
                .map(|(i, _)| i)
                .collect(),
            error: None,
        }
    }
}

/// Body of the encrypt request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptRequest {
    /// Plaintext message.
    pub message: String,
    /// Sifted key bits.
    pub key: Vec<Bit>,
}

impl fmt::Debug for EncryptRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptRequest")
            .field("message", &format!("<redacted {} bytes>", self.message.len()))
            .field("key", &format!("<redacted {} bits>", self.key.len()))
            .finish()
    }
}

/// Authenticated ciphertext as produced by the cipher collaborator.
///
/// The core treats this as opaque; it is carried inside [`Ciphertext`] as its
/// JSON encoding and unpacked again for the decrypt request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Base64 ciphertext.
    pub ciphertext: String,
    /// Base64 nonce.
    pub nonce: String,
    /// Base64 authentication tag.
    pub tag: String,
}

impl EncryptedEnvelope {
    /// Pack into an opaque ciphertext.
    pub fn to_ciphertext(&self) -> Result<Ciphertext, ProtoError> {
        serde_json::to_string(self)
            .map(Ciphertext::new)
            .map_err(|e| ProtoError::Malformed { reason: e.to_string() })
    }

    /// Unpack an opaque ciphertext.
    pub fn from_ciphertext(ciphertext: &Ciphertext) -> Result<Self, ProtoError> {
        serde_json::from_str(ciphertext.as_str())
            .map_err(|e| ProtoError::Malformed { reason: e.to_string() })
    }
}

/// Body of the encrypt response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptResponse {
    /// Base64 ciphertext.
    #[serde(default)]
    pub ciphertext: Option<String>,
    /// Base64 nonce.
    #[serde(default)]
    pub nonce: Option<String>,
    /// Base64 authentication tag.
    #[serde(default)]
    pub tag: Option<String>,
    /// Explicit failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EncryptResponse {
    /// Extract the ciphertext or the reported failure.
    pub fn into_ciphertext(self) -> Result<Ciphertext, ProtoError> {
        if let Some(message) = self.error {
            return Err(ProtoError::Reported { message });
        }

        let envelope = EncryptedEnvelope {
            ciphertext: self.ciphertext.ok_or(ProtoError::MissingField { field: "ciphertext" })?,
            nonce: self.nonce.ok_or(ProtoError::MissingField { field: "nonce" })?,
            tag: self.tag.ok_or(ProtoError::MissingField { field: "tag" })?,
        };

        envelope.to_ciphertext()
    }
}

/// Body of the decrypt request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptRequest {
    /// Envelope returned by the encrypt call.
    pub encrypted_data: EncryptedEnvelope,
    /// Sifted key bits.
    pub key: Vec<Bit>,
}

impl DecryptRequest {
    /// Build a decrypt request from an opaque ciphertext.
    pub fn new(ciphertext: &Ciphertext, key: &[Bit]) -> Result<Self, ProtoError> {
        let encrypted_data = EncryptedEnvelope::from_ciphertext(ciphertext)?;
        Ok(Self { encrypted_data, key: key.to_vec() })
    }
}

impl fmt::Debug for DecryptRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptRequest")
            .field("encrypted_data", &self.encrypted_data)
            .field("key", &format!("<redacted {} bits>", self.key.len()))
            .finish()
    }
}

/// Body of the decrypt response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptResponse {
    /// Recovered plaintext.
    #[serde(default)]
    pub decrypted: Option<String>,
    /// Explicit failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DecryptResponse {
    /// Extract the plaintext or the reported failure.
    pub fn into_plaintext(self) -> Result<String, ProtoError> {
        if let Some(message) = self.error {
            return Err(ProtoError::Reported { message });
        }
        self.decrypted.ok_or(ProtoError::MissingField { field: "decrypted" })
    }
}

fn parse_flag(value: &str, index: usize, field: &str) -> Result<bool, ProtoError> {
    match value {
        YES => Ok(true),
        NO => Ok(false),
        other => Err(ProtoError::InconsistentRow {
            index,
            reason: format!("{field} flag is neither Yes nor No: {other:?}"),
        }),
    }
}

fn flag(value: bool) -> &'static str {
    if value { YES } else { NO }
}

fn to_bits(values: &[u8]) -> Result<Vec<Bit>, ProtoError> {
    values.iter().map(|v| Bit::try_from(*v)).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ENGINE_RESPONSE: &str = r#"{
        "table_data": [
            {"Alice Bit": 1, "Alice Basis": "+ (0°)", "Bob Basis": "+ (0°)",
             "Eve Intercepting": "No", "Eve Bit": "-", "Bob Measured Bit": 1, "Match": "Yes"},
            {"Alice Bit": 0, "Alice Basis": "× (45°)", "Bob Basis": "+ (0°)",
             "Eve Intercepting": "Yes", "Eve Bit": 1, "Bob Measured Bit": 1, "Match": "No"}
        ],
        "alice_key": [1],
        "bob_key": [1],
        "qber": 0.0,
        "eve_key": [],
        "matched_indices": [0]
    }"#;

    fn row() -> WireRow {
        WireRow {
            sender_bit: 1,
            sender_basis: "+ (0°)".to_string(),
            receiver_basis: "+ (0°)".to_string(),
            intercepted: "No".to_string(),
            interceptor_bit: WireInterceptorBit::Sentinel("-".to_string()),
            receiver_bit: 1,
            bases_match: "Yes".to_string(),
        }
    }

    #[test]
    fn parses_engine_response() {
        let response: BatchResponse = serde_json::from_str(ENGINE_RESPONSE).unwrap();
        let batch = response.into_batch(2).unwrap();

        assert_eq!(batch.records.len(), 2);
        assert!(batch.records[0].bases_match());
        assert!(!batch.records[0].intercepted());
        assert_eq!(batch.records[1].interceptor_bit(), Some(Bit::One));
        assert_eq!(batch.reported.sifted_key, vec![Bit::One]);
    }

    #[test]
    fn explicit_error_wins() {
        let response: BatchResponse =
            serde_json::from_str(r#"{"error": "backend offline"}"#).unwrap();
        let result = response.into_batch(10);

        assert_eq!(result, Err(ProtoError::Reported { message: "backend offline".to_string() }));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let response: BatchResponse = serde_json::from_str(ENGINE_RESPONSE).unwrap();
        let result = response.into_batch(3);

        assert!(matches!(result, Err(ProtoError::BatchLength { expected: 3, actual: 2 })));
    }

    #[test]
    fn contradictory_match_flag_is_rejected() {
        let mut bad = row();
        bad.bases_match = "No".to_string();

        assert!(matches!(bad.to_record(4), Err(ProtoError::InconsistentRow { index: 4, .. })));
    }

    #[test]
    fn intercepted_row_without_bit_is_rejected() {
        let mut bad = row();
        bad.intercepted = "Yes".to_string();

        assert!(matches!(bad.to_record(0), Err(ProtoError::InconsistentRow { .. })));
    }

    #[test]
    fn stray_interceptor_bit_is_rejected() {
        let mut bad = row();
        bad.interceptor_bit = WireInterceptorBit::Bit(0);

        assert!(matches!(bad.to_record(0), Err(ProtoError::InconsistentRow { .. })));
    }

    #[test]
    fn row_roundtrips_through_record() {
        let original = row();
        let record = original.to_record(0).unwrap();

        assert_eq!(WireRow::from_record(&record), original);
    }

    #[test]
    fn encrypt_response_packs_envelope() {
        let response = EncryptResponse {
            ciphertext: Some("YWJj".to_string()),
            nonce: Some("bm9uY2U=".to_string()),
            tag: Some("dGFn".to_string()),
            error: None,
        };

        let ciphertext = response.into_ciphertext().unwrap();
        let request = DecryptRequest::new(&ciphertext, &[Bit::One]).unwrap();

        assert_eq!(request.encrypted_data.ciphertext, "YWJj");
        assert_eq!(request.encrypted_data.nonce, "bm9uY2U=");
    }

    #[test]
    fn encrypt_response_missing_tag() {
        let response = EncryptResponse {
            ciphertext: Some("YWJj".to_string()),
            nonce: Some("bm9uY2U=".to_string()),
            tag: None,
            error: None,
        };

        assert_eq!(response.into_ciphertext(), Err(ProtoError::MissingField { field: "tag" }));
    }

    #[test]
    fn decrypt_response_error_field() {
        let response: DecryptResponse =
            serde_json::from_str(r#"{"error": "MAC check failed"}"#).unwrap();

        assert!(matches!(response.into_plaintext(), Err(ProtoError::Reported { .. })));
    }

    #[test]
    fn request_uses_engine_field_names() {
        let request = BatchRequest {
            particle_count: 12,
            interception_probability: 0.5,
            hardware_mode: true,
        };
        let json = serde_json::to_value(WireBatchRequest::from(&request)).unwrap();

        assert_eq!(json, serde_json::json!({"n_bits": 12, "eve_prob": 0.5, "use_real": true}));
    }

    #[test]
    fn encrypt_request_debug_redacts_key() {
        let request =
            EncryptRequest { message: "hello".to_string(), key: vec![Bit::One, Bit::Zero] };
        let debug = format!("{request:?}");

        assert!(debug.contains("<redacted 2 bits>"));
        assert!(!debug.contains("hello"));
    }
}
