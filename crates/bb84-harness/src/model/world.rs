//! Synchronous world driving the real state machines.
//!
//! The world owns one [`SessionController`] and one [`MessagePipeline`] and
//! plays the part of the runtime: it executes their actions by queueing
//! collaborator calls, and answers those calls only when an
//! [`Operation`] says so. Answers may therefore arrive late, out of order,
//! or for runs that have since been cancelled.

use std::time::{Duration, Instant};

use bb84_core::{
    ControllerConfig, Generation, KeySource, MessageAction, MessageError, MessageId,
    MessagePipeline, MessageStage, RunState, SessionAction, SessionController, SessionError,
};
use bb84_proto::{BatchRequest, Bit, Ciphertext};

use super::{
    operation::{Operation, OperationError, OperationResult, RunParams},
    oracle::Oracle,
};
use crate::{
    SimEnv,
    scripted_cipher::{open, seal},
    sim_engine::exchange,
};

#[derive(Debug)]
struct PendingEncrypt {
    id: MessageId,
    plaintext: String,
    key: Vec<Bit>,
}

#[derive(Debug)]
struct PendingDecrypt {
    id: MessageId,
    ciphertext: Ciphertext,
    key: Vec<Bit>,
}

/// Deterministic world for model-based tests and fuzzing.
#[derive(Debug)]
pub struct SimWorld {
    env: SimEnv,
    now: Instant,
    controller: SessionController,
    pipeline: MessagePipeline,
    batches: Vec<(Generation, BatchRequest)>,
    encrypts: Vec<PendingEncrypt>,
    decrypts: Vec<PendingDecrypt>,
    oracle: Oracle,
}

impl SimWorld {
    /// World with default limits and gate, engine randomness from `seed`.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, ControllerConfig::default())
    }

    /// World with explicit limits and gate.
    pub fn with_config(seed: u64, config: ControllerConfig) -> Self {
        Self {
            env: SimEnv::with_seed(seed),
            now: Instant::now(),
            controller: SessionController::new(config),
            pipeline: MessagePipeline::new(config.gate),
            batches: Vec::new(),
            encrypts: Vec::new(),
            decrypts: Vec::new(),
            oracle: Oracle::new(),
        }
    }

    /// The controller under test.
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// The pipeline under test.
    pub fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    /// Invariant checker fed by every applied operation.
    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    /// Engine requests not yet answered.
    pub fn pending_batches(&self) -> usize {
        self.batches.len()
    }

    /// Cipher calls not yet answered.
    pub fn pending_cipher_calls(&self) -> usize {
        self.encrypts.len() + self.decrypts.len()
    }

    /// Apply an operation and return the result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::StartRun(params) => self.apply_start_run(*params),
            Operation::CancelRun => {
                let actions = self.controller.cancel_current_run();
                self.execute_session(actions);
                OperationResult::Ok
            },
            Operation::AdvanceTime { millis } => {
                self.now += Duration::from_millis(u64::from(*millis));
                let actions = self.controller.tick(self.now);
                self.execute_session(actions);
                OperationResult::Ok
            },
            Operation::DeliverBatch { slot, fail } => self.apply_deliver_batch(*slot, *fail),
            Operation::SendMessage(message) => self.apply_send(message.to_text()),
            Operation::ResolveEncrypt { slot, fail } => self.apply_resolve_encrypt(*slot, *fail),
            Operation::ResolveDecrypt { slot, fail } => self.apply_resolve_decrypt(*slot, *fail),
        }
    }

    /// Play out every outstanding call and cue in a fixed order.
    ///
    /// Used after a random prefix to check the world can always settle.
    pub fn settle(&mut self) {
        // Each pass strictly shrinks the work left, so this terminates.
        loop {
            if !self.batches.is_empty() {
                self.apply_deliver_batch(0, false);
            } else if let Some(deadline) = self.controller.next_deadline() {
                self.now = self.now.max(deadline);
                let actions = self.controller.tick(self.now);
                self.execute_session(actions);
            } else if !self.encrypts.is_empty() {
                self.apply_resolve_encrypt(0, false);
            } else if !self.decrypts.is_empty() {
                self.apply_resolve_decrypt(0, false);
            } else {
                break;
            }
        }
    }

    /// Check end-state invariants. Stream invariants are checked as
    /// actions are observed; see [`Oracle::violations`].
    pub fn final_violations(&self) -> Vec<String> {
        let mut violations = self.oracle.violations().to_vec();

        let runs = self.controller.history().iter().chain(self.controller.active_run());
        for run in runs {
            let generation = run.id();
            match run.state() {
                RunState::Cancelled => {
                    if !run.records().is_empty() {
                        violations.push(format!("cancelled run {generation} exposes records"));
                    }
                },
                RunState::Completed => {
                    let expected = run.config().particle_count as usize;
                    if run.records().len() != expected {
                        violations.push(format!(
                            "completed run {generation} has {} of {expected} records",
                            run.records().len()
                        ));
                    }
                    if run.records() != self.oracle.records(generation) {
                        violations.push(format!("run {generation} records differ from playback"));
                    }
                },
                RunState::Failed => {
                    if !run.diagnostic_records().is_empty() {
                        violations.push(format!("failed run {generation} has records"));
                    }
                },
                RunState::Idle | RunState::Requesting | RunState::Playing => {},
            }
        }

        for message in self.pipeline.records() {
            if message.stage() == MessageStage::Delivered
                && message.decrypted_text() != Some(message.plaintext())
            {
                violations.push(format!("message {} decrypted to other text", message.id()));
            }
        }

        violations
    }

    fn apply_start_run(&mut self, params: RunParams) -> OperationResult {
        match self.controller.start_run(params.to_config()) {
            Ok((_, actions)) => {
                self.execute_session(actions);
                OperationResult::Ok
            },
            Err(SessionError::InvalidConfig { .. }) => {
                OperationResult::Error(OperationError::InvalidConfig)
            },
            Err(e) => {
                self.oracle.report(format!("start_run returned {e}"));
                OperationResult::Error(OperationError::InvalidConfig)
            },
        }
    }

    fn apply_deliver_batch(&mut self, slot: u8, fail: bool) -> OperationResult {
        let Some((generation, request)) = take(&mut self.batches, slot) else {
            return OperationResult::Error(OperationError::NothingPending);
        };

        let result = if fail {
            Err("engine unavailable".to_string())
        } else {
            Ok(exchange(&self.env, &request, 0.0))
        };
        let actions = self.controller.batch_received(generation, result, self.now);
        self.execute_session(actions);
        OperationResult::Ok
    }

    fn apply_send(&mut self, text: String) -> OperationResult {
        let sent = match self.controller.active_run() {
            Some(run) => self.pipeline.send(text, run),
            None => Err(MessageError::NoKey),
        };

        match sent {
            Ok((_, actions)) => {
                self.execute_message(actions);
                OperationResult::Ok
            },
            Err(MessageError::EmptyMessage) => OperationResult::Error(OperationError::EmptyMessage),
            Err(MessageError::NoKey) => OperationResult::Error(OperationError::NoKey),
            Err(MessageError::SecurityDenied(_)) => {
                OperationResult::Error(OperationError::SecurityDenied)
            },
            Err(e @ MessageError::UnknownMessage { .. }) => {
                self.oracle.report(format!("send returned {e}"));
                OperationResult::Error(OperationError::NoKey)
            },
        }
    }

    fn apply_resolve_encrypt(&mut self, slot: u8, fail: bool) -> OperationResult {
        let Some(call) = take(&mut self.encrypts, slot) else {
            return OperationResult::Error(OperationError::NothingPending);
        };

        let result = if fail {
            Err("cipher unavailable".to_string())
        } else {
            seal(&call.plaintext, &call.key)
        };
        match self.pipeline.encrypt_resolved(call.id, result, &self.controller) {
            Ok(actions) => self.execute_message(actions),
            Err(e) => self.oracle.report(format!("encrypt answer for {} rejected: {e}", call.id)),
        }
        OperationResult::Ok
    }

    fn apply_resolve_decrypt(&mut self, slot: u8, fail: bool) -> OperationResult {
        let Some(call) = take(&mut self.decrypts, slot) else {
            return OperationResult::Error(OperationError::NothingPending);
        };

        let result = if fail {
            Err("cipher unavailable".to_string())
        } else {
            open(&call.ciphertext, &call.key)
        };
        match self.pipeline.decrypt_resolved(call.id, result, &self.controller) {
            Ok(actions) => self.execute_message(actions),
            Err(e) => self.oracle.report(format!("decrypt answer for {} rejected: {e}", call.id)),
        }
        OperationResult::Ok
    }

    fn execute_session(&mut self, actions: Vec<SessionAction>) {
        let active = self.controller.active_generation();
        for action in actions {
            self.oracle.observe_session(&action, active);
            if let SessionAction::RequestBatch { generation, request } = action {
                self.batches.push((generation, request));
            }
        }
    }

    fn execute_message(&mut self, actions: Vec<MessageAction>) {
        let active = self.controller.active_generation();
        for action in actions {
            self.oracle.observe_message(&action, active);
            match action {
                MessageAction::Encrypt { id, plaintext, key, .. } => {
                    self.encrypts.push(PendingEncrypt { id, plaintext, key });
                },
                MessageAction::Decrypt { id, ciphertext, key, .. } => {
                    if self.controller.active_key() != Some(key.as_slice()) {
                        self.oracle
                            .report(format!("decrypt for {id} uses a key that is not active"));
                    }
                    self.decrypts.push(PendingDecrypt { id, ciphertext, key });
                },
                MessageAction::StageChanged { .. } | MessageAction::Discarded { .. } => {},
            }
        }
    }
}

fn take<T>(pending: &mut Vec<T>, slot: u8) -> Option<T> {
    if pending.is_empty() {
        return None;
    }
    let index = usize::from(slot) % pending.len();
    Some(pending.remove(index))
}
