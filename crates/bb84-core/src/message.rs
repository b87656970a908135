//! Secure message pipeline.
//!
//! Each message is bound at send time to the generation of the run whose key
//! encrypted it. Cipher responses are applied only while that generation is
//! still the active one; otherwise they are dropped and the record keeps its
//! last valid stage. A message abandoned this way stays visibly `Pending`
//! (or `Encrypted`) rather than claiming delivery against a withdrawn key.
//!
//! ```text
//!   send ──► Pending ──encrypt ok──► Encrypted ──decrypt ok──► Delivered
//!               │                        │
//!               └──encrypt err──► Failed ◄──decrypt err──┘
//! ```
//!
//! The decrypt request re-reads the active key from the [`KeySource`] instead
//! of reusing the key captured at send time.

use std::{collections::BTreeMap, fmt};

use bb84_proto::{Bit, Ciphertext};

use crate::{
    error::{FailureReason, MessageError},
    gate::{DenyReason, GateDecision, SecurityGate},
    session::{Generation, SessionRun},
};

/// Read access to the active generation and its key.
pub trait KeySource {
    /// Generation currently considered active.
    fn active_generation(&self) -> Generation;

    /// Sifted key of the active run, if it has one.
    fn active_key(&self) -> Option<&[Bit]>;
}

/// Message identifier, unique within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    /// Raw id.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle stage of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStage {
    /// Waiting for encryption.
    Pending,
    /// Encrypted; waiting for the decrypt round trip.
    Encrypted,
    /// Round trip finished.
    Delivered,
    /// A cipher call failed.
    Failed,
}

/// A message and its round-trip progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureMessageRecord {
    id: MessageId,
    plaintext: String,
    bound_generation: Generation,
    stage: MessageStage,
    ciphertext: Option<Ciphertext>,
    decrypted_text: Option<String>,
    failure: Option<FailureReason>,
}

impl SecureMessageRecord {
    /// Message id.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Text the user sent.
    pub fn plaintext(&self) -> &str {
        &self.plaintext
    }

    /// Generation whose key was captured at send time.
    pub fn bound_generation(&self) -> Generation {
        self.bound_generation
    }

    /// Current stage.
    pub fn stage(&self) -> MessageStage {
        self.stage
    }

    /// Ciphertext, present from `Encrypted` on.
    pub fn ciphertext(&self) -> Option<&Ciphertext> {
        self.ciphertext.as_ref()
    }

    /// Decrypted text, present once `Delivered`.
    pub fn decrypted_text(&self) -> Option<&str> {
        self.decrypted_text.as_deref()
    }

    /// Failure reason, present once `Failed`.
    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }
}

/// Why a cipher response was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDiscard {
    /// The bound generation is no longer active.
    StaleGeneration,
    /// The record is not at the stage this response answers.
    UnexpectedStage,
    /// The generation is active but has no key to continue with.
    NoActiveKey,
}

/// Output of the message pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageAction {
    /// Call the encrypt collaborator.
    Encrypt {
        /// Message to tag the result with.
        id: MessageId,
        /// Bound generation.
        generation: Generation,
        /// Text to encrypt.
        plaintext: String,
        /// Sifted key captured at send time.
        key: Vec<Bit>,
    },

    /// Call the decrypt collaborator.
    Decrypt {
        /// Message to tag the result with.
        id: MessageId,
        /// Bound generation.
        generation: Generation,
        /// Ciphertext from the encrypt step.
        ciphertext: Ciphertext,
        /// Active key re-read when the encrypt result arrived.
        key: Vec<Bit>,
    },

    /// A message moved to a new stage.
    StageChanged {
        /// Message that moved.
        id: MessageId,
        /// New stage.
        stage: MessageStage,
    },

    /// A cipher response was ignored.
    Discarded {
        /// Message the response was for.
        id: MessageId,
        /// Generation the message is bound to.
        bound: Generation,
        /// Generation active when the response arrived.
        current: Generation,
        /// Why it was ignored.
        reason: MessageDiscard,
    },
}

/// Manages message records and their cipher round trips.
#[derive(Debug, Clone)]
pub struct MessagePipeline {
    gate: SecurityGate,
    next_id: u64,
    records: BTreeMap<MessageId, SecureMessageRecord>,
}

impl Default for MessagePipeline {
    fn default() -> Self {
        Self::new(SecurityGate::default())
    }
}

impl MessagePipeline {
    /// Empty pipeline enforcing `gate`.
    pub fn new(gate: SecurityGate) -> Self {
        Self { gate, next_id: 1, records: BTreeMap::new() }
    }

    /// Gate enforced on send.
    pub fn gate(&self) -> &SecurityGate {
        &self.gate
    }

    /// Look up a message.
    pub fn record(&self, id: MessageId) -> Option<&SecureMessageRecord> {
        self.records.get(&id)
    }

    /// All messages in send order.
    pub fn records(&self) -> impl Iterator<Item = &SecureMessageRecord> {
        self.records.values()
    }

    /// Create a `Pending` message bound to `run` and request encryption.
    ///
    /// # Errors
    ///
    /// Checked in order, before any record is created:
    /// - `EmptyMessage` for blank text
    /// - `NoKey` when `run` has no sifted key
    /// - `SecurityDenied` when the gate refuses the run's metric
    pub fn send(
        &mut self,
        plaintext: impl Into<String>,
        run: &SessionRun,
    ) -> Result<(MessageId, Vec<MessageAction>), MessageError> {
        let plaintext = plaintext.into();
        if plaintext.trim().is_empty() {
            return Err(MessageError::EmptyMessage);
        }
        if run.sifted_key().is_empty() {
            return Err(MessageError::NoKey);
        }
        match run.gate_decision(&self.gate) {
            GateDecision::Allowed => {},
            GateDecision::Denied(DenyReason::NoKey) => return Err(MessageError::NoKey),
            GateDecision::Denied(reason) => {
                tracing::info!(generation = %run.id(), metric = run.metric(), "send denied");
                return Err(MessageError::SecurityDenied(reason));
            },
        }

        let id = MessageId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        let generation = run.id();

        self.records.insert(id, SecureMessageRecord {
            id,
            plaintext: plaintext.clone(),
            bound_generation: generation,
            stage: MessageStage::Pending,
            ciphertext: None,
            decrypted_text: None,
            failure: None,
        });
        tracing::debug!(%id, %generation, "message pending");

        let action =
            MessageAction::Encrypt { id, generation, plaintext, key: run.sifted_key().to_vec() };
        Ok((id, vec![action]))
    }

    /// Apply the encrypt collaborator's answer for `id`.
    ///
    /// On success the record becomes `Encrypted` and a `Decrypt` action is
    /// issued with the key `keys` reports now.
    ///
    /// # Errors
    ///
    /// `UnknownMessage` if `id` was never issued.
    pub fn encrypt_resolved(
        &mut self,
        id: MessageId,
        result: Result<Ciphertext, String>,
        keys: &impl KeySource,
    ) -> Result<Vec<MessageAction>, MessageError> {
        let record = self.records.get_mut(&id).ok_or(MessageError::UnknownMessage { id: id.0 })?;
        if let Some(discard) = check_current(record, MessageStage::Pending, keys) {
            return Ok(vec![discard]);
        }
        let generation = record.bound_generation;

        let ciphertext = match result {
            Ok(ciphertext) => ciphertext,
            Err(message) => {
                tracing::warn!(%id, %message, "encrypt failed");
                return Ok(fail(record, FailureReason::EncryptError(message)));
            },
        };

        let Some(key) = keys.active_key() else {
            return Ok(vec![discarded(record, keys, MessageDiscard::NoActiveKey)]);
        };

        record.stage = MessageStage::Encrypted;
        record.ciphertext = Some(ciphertext.clone());
        tracing::debug!(%id, %generation, "message encrypted");

        Ok(vec![
            MessageAction::StageChanged { id, stage: MessageStage::Encrypted },
            MessageAction::Decrypt { id, generation, ciphertext, key: key.to_vec() },
        ])
    }

    /// Apply the decrypt collaborator's answer for `id`.
    ///
    /// # Errors
    ///
    /// `UnknownMessage` if `id` was never issued.
    pub fn decrypt_resolved(
        &mut self,
        id: MessageId,
        result: Result<String, String>,
        keys: &impl KeySource,
    ) -> Result<Vec<MessageAction>, MessageError> {
        let record = self.records.get_mut(&id).ok_or(MessageError::UnknownMessage { id: id.0 })?;
        if let Some(discard) = check_current(record, MessageStage::Encrypted, keys) {
            return Ok(vec![discard]);
        }

        match result {
            Ok(text) => {
                record.stage = MessageStage::Delivered;
                record.decrypted_text = Some(text);
                tracing::info!(%id, generation = %record.bound_generation, "message delivered");
                Ok(vec![MessageAction::StageChanged { id, stage: MessageStage::Delivered }])
            },
            Err(message) => {
                tracing::warn!(%id, %message, "decrypt failed");
                Ok(fail(record, FailureReason::DecryptError(message)))
            },
        }
    }
}

/// `Some(Discarded)` unless the record is at `expected` and still bound to
/// the active generation.
fn check_current(
    record: &SecureMessageRecord,
    expected: MessageStage,
    keys: &impl KeySource,
) -> Option<MessageAction> {
    if record.bound_generation != keys.active_generation() {
        return Some(discarded(record, keys, MessageDiscard::StaleGeneration));
    }
    if record.stage != expected {
        return Some(discarded(record, keys, MessageDiscard::UnexpectedStage));
    }
    None
}

fn discarded(
    record: &SecureMessageRecord,
    keys: &impl KeySource,
    reason: MessageDiscard,
) -> MessageAction {
    let current = keys.active_generation();
    tracing::debug!(
        id = %record.id,
        bound = %record.bound_generation,
        %current,
        ?reason,
        "discarding cipher response"
    );
    MessageAction::Discarded { id: record.id, bound: record.bound_generation, current, reason }
}

fn fail(record: &mut SecureMessageRecord, reason: FailureReason) -> Vec<MessageAction> {
    record.stage = MessageStage::Failed;
    record.failure = Some(reason);
    vec![MessageAction::StageChanged { id: record.id, stage: MessageStage::Failed }]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::{Duration, Instant};

    use bb84_proto::{Basis, ExchangeBatch, ExchangeRecord};

    use super::*;
    use crate::session::{ControllerConfig, SessionConfig, SessionController};

    fn completed(count: u32, intercepted: impl Fn(usize) -> bool) -> SessionController {
        let mut controller = SessionController::new(ControllerConfig::default());
        let (generation, _) = controller
            .start_run(SessionConfig {
                particle_count: count,
                interception_probability: 0.5,
                pace: Duration::from_millis(1),
                hardware_mode: false,
            })
            .unwrap();

        let records = (0..count as usize)
            .map(|i| {
                let bit = Bit::from_lsb(i as u8);
                ExchangeRecord::new(
                    bit,
                    Basis::Rectilinear,
                    Basis::Rectilinear,
                    bit,
                    intercepted(i).then_some(bit),
                )
            })
            .collect();
        let batch = ExchangeBatch::from_records(records);
        controller.batch_received(generation, Ok(batch), Instant::now());
        while let Some(deadline) = controller.next_deadline() {
            controller.tick(deadline);
        }
        controller
    }

    fn encrypt_target(actions: &[MessageAction]) -> (MessageId, Vec<Bit>) {
        match actions {
            [MessageAction::Encrypt { id, key, .. }] => (*id, key.clone()),
            other => panic!("expected a single Encrypt, got {other:?}"),
        }
    }

    #[test]
    fn round_trip_delivers() {
        let controller = completed(10, |_| false);
        let run = controller.active_run().unwrap();
        let mut pipeline = MessagePipeline::new(SecurityGate::default());

        let (id, actions) = pipeline.send("hello", run).unwrap();
        let (_, key) = encrypt_target(&actions);
        assert_eq!(key, run.sifted_key());

        let actions =
            pipeline.encrypt_resolved(id, Ok(Ciphertext::new("c1")), &controller).unwrap();
        assert!(matches!(actions.as_slice(), [
            MessageAction::StageChanged { stage: MessageStage::Encrypted, .. },
            MessageAction::Decrypt { .. },
        ]));

        pipeline.decrypt_resolved(id, Ok("hello".into()), &controller).unwrap();
        let record = pipeline.record(id).unwrap();
        assert_eq!(record.stage(), MessageStage::Delivered);
        assert_eq!(record.decrypted_text(), Some("hello"));
        assert_eq!(record.ciphertext(), Some(&Ciphertext::new("c1")));
    }

    #[test]
    fn send_checks_in_order() {
        let controller = completed(10, |_| true);
        let run = controller.active_run().unwrap();
        let mut pipeline = MessagePipeline::new(SecurityGate::default());

        assert_eq!(pipeline.send("   ", run), Err(MessageError::EmptyMessage));
        assert_eq!(
            pipeline.send("hi", run),
            Err(MessageError::SecurityDenied(DenyReason::MetricExceeded))
        );
        assert_eq!(pipeline.records().count(), 0);
    }

    #[test]
    fn send_without_key_is_rejected() {
        let mut controller = SessionController::new(ControllerConfig::default());
        controller
            .start_run(SessionConfig {
                particle_count: 10,
                interception_probability: 0.0,
                pace: Duration::from_millis(1),
                hardware_mode: false,
            })
            .unwrap();
        let run = controller.active_run().unwrap();
        let mut pipeline = MessagePipeline::new(SecurityGate::default());

        assert_eq!(pipeline.send("hi", run), Err(MessageError::NoKey));
    }

    #[test]
    fn high_metric_rejected_before_encrypt() {
        // 5 of 20 intercepted: metric 25.
        let controller = completed(20, |i| i % 4 == 0);
        let run = controller.active_run().unwrap();
        assert!(!run.sifted_key().is_empty());

        let mut pipeline = MessagePipeline::new(SecurityGate::default());
        let result = pipeline.send("hello", run);
        assert_eq!(result, Err(MessageError::SecurityDenied(DenyReason::MetricExceeded)));
        assert!(pipeline.records().next().is_none());
    }

    #[test]
    fn cancel_before_encrypt_leaves_message_pending() {
        let mut controller = completed(10, |_| false);
        let mut pipeline = MessagePipeline::new(SecurityGate::default());
        let (id, _) = pipeline.send("hello", controller.active_run().unwrap()).unwrap();

        controller.cancel_current_run();

        let actions =
            pipeline.encrypt_resolved(id, Ok(Ciphertext::new("c1")), &controller).unwrap();
        assert!(matches!(actions.as_slice(), [MessageAction::Discarded {
            reason: MessageDiscard::StaleGeneration,
            ..
        }]));
        assert!(!actions.iter().any(|a| matches!(a, MessageAction::Decrypt { .. })));
        assert_eq!(pipeline.record(id).unwrap().stage(), MessageStage::Pending);
    }

    #[test]
    fn superseded_before_decrypt_stays_encrypted() {
        let mut controller = completed(10, |_| false);
        let mut pipeline = MessagePipeline::new(SecurityGate::default());
        let (id, _) = pipeline.send("hello", controller.active_run().unwrap()).unwrap();
        pipeline.encrypt_resolved(id, Ok(Ciphertext::new("c1")), &controller).unwrap();

        controller
            .start_run(SessionConfig {
                particle_count: 10,
                interception_probability: 0.0,
                pace: Duration::from_millis(1),
                hardware_mode: false,
            })
            .unwrap();

        pipeline.decrypt_resolved(id, Ok("hello".into()), &controller).unwrap();
        let record = pipeline.record(id).unwrap();
        assert_eq!(record.stage(), MessageStage::Encrypted);
        assert_eq!(record.decrypted_text(), None);
    }

    #[test]
    fn cipher_failures_are_scoped_to_the_record() {
        let controller = completed(10, |_| false);
        let run = controller.active_run().unwrap();
        let mut pipeline = MessagePipeline::new(SecurityGate::default());

        let (first, _) = pipeline.send("one", run).unwrap();
        let (second, _) = pipeline.send("two", run).unwrap();
        pipeline.encrypt_resolved(first, Err("bad key".into()), &controller).unwrap();
        pipeline.encrypt_resolved(second, Ok(Ciphertext::new("c2")), &controller).unwrap();
        pipeline.decrypt_resolved(second, Err("tag mismatch".into()), &controller).unwrap();

        assert_eq!(
            pipeline.record(first).unwrap().failure(),
            Some(&FailureReason::EncryptError("bad key".into()))
        );
        assert_eq!(
            pipeline.record(second).unwrap().failure(),
            Some(&FailureReason::DecryptError("tag mismatch".into()))
        );
        assert!(controller.active_key().is_some());
    }

    #[test]
    fn duplicate_response_is_discarded() {
        let controller = completed(10, |_| false);
        let mut pipeline = MessagePipeline::new(SecurityGate::default());
        let (id, _) = pipeline.send("hello", controller.active_run().unwrap()).unwrap();
        pipeline.encrypt_resolved(id, Ok(Ciphertext::new("c1")), &controller).unwrap();

        let actions =
            pipeline.encrypt_resolved(id, Ok(Ciphertext::new("c2")), &controller).unwrap();
        assert!(matches!(actions.as_slice(), [MessageAction::Discarded {
            reason: MessageDiscard::UnexpectedStage,
            ..
        }]));
        assert_eq!(pipeline.record(id).unwrap().ciphertext(), Some(&Ciphertext::new("c1")));
    }

    #[test]
    fn unknown_message() {
        let controller = completed(10, |_| false);
        let mut pipeline = MessagePipeline::new(SecurityGate::default());
        let result = pipeline.decrypt_resolved(MessageId(42), Ok("x".into()), &controller);
        assert_eq!(result, Err(MessageError::UnknownMessage { id: 42 }));
    }
}
