//! Async driver for the session controller and message pipeline.
//!
//! The runtime owns both state machines and is the only place that performs
//! I/O. It executes their actions, spawns one task per collaborator call, and
//! feeds the tagged answers back on an internal channel. A spawned call is
//! never aborted; when its generation has been superseded the state machines
//! discard the answer on arrival.
//!
//! ```text
//!   RuntimeHandle ──commands──┐
//!                             ▼
//!   collaborator tasks ──► Runtime::run ──notices──► observer
//!            ▲                 │
//!            └───── spawn ─────┘
//! ```

use std::sync::Arc;

use bb84_core::{
    Environment, GateDecision, Generation, MessageAction, MessageError, MessageId, MessagePipeline,
    RunState, SecureMessageRecord, SessionAction, SessionConfig, SessionController, SessionError,
    SessionRun,
};
use bb84_proto::{Ciphertext, ExchangeBatch};
use tokio::sync::{mpsc, oneshot};

use crate::{
    collaborator::{CipherProvider, ExchangeEngine},
    config::RuntimeConfig,
    error::RuntimeError,
};

/// Observation emitted by the runtime for rendering or logging.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeNotice {
    /// Output of the session controller.
    Session(SessionAction),
    /// Output of the message pipeline.
    Message(MessageAction),
    /// The runtime loop exited.
    Stopped,
}

/// Point-in-time copy of runtime state.
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    /// Active generation.
    pub generation: Generation,
    /// State of the active run.
    pub state: RunState,
    /// The active run, if any.
    pub active_run: Option<SessionRun>,
    /// Superseded runs, oldest first.
    pub history: Vec<SessionRun>,
    /// Every message, in send order.
    pub messages: Vec<SecureMessageRecord>,
    /// Gate verdict for the active run.
    pub gate: GateDecision,
}

#[derive(Debug)]
enum Command {
    StartRun {
        config: SessionConfig,
        reply: oneshot::Sender<Result<Generation, SessionError>>,
    },
    CancelRun {
        reply: oneshot::Sender<()>,
    },
    SendMessage {
        plaintext: String,
        reply: oneshot::Sender<Result<MessageId, MessageError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RuntimeSnapshot>,
    },
    Shutdown,
}

/// Answer from a spawned collaborator call.
enum Completion {
    Batch { generation: Generation, result: Result<ExchangeBatch, String> },
    Encrypted { id: MessageId, result: Result<Ciphertext, String> },
    Decrypted { id: MessageId, result: Result<String, String> },
}

enum Step {
    Command(Option<Command>),
    Completion(Completion),
    Tick,
}

/// Cloneable handle for sending commands to a running [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    commands: mpsc::Sender<Command>,
}

impl RuntimeHandle {
    /// Start a new run, superseding the current one.
    ///
    /// # Errors
    ///
    /// `Session(InvalidConfig)` for rejected parameters, `Stopped` if the
    /// runtime has exited.
    pub async fn start_run(&self, config: SessionConfig) -> Result<Generation, RuntimeError> {
        self.request(|reply| Command::StartRun { config, reply }).await?.map_err(RuntimeError::from)
    }

    /// Cancel the active run.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime has exited.
    pub async fn cancel_run(&self) -> Result<(), RuntimeError> {
        self.request(|reply| Command::CancelRun { reply }).await
    }

    /// Send a message under the active run's key.
    ///
    /// # Errors
    ///
    /// `Message(..)` when the pipeline refuses, `Stopped` if the runtime has
    /// exited.
    pub async fn send_message(
        &self,
        plaintext: impl Into<String>,
    ) -> Result<MessageId, RuntimeError> {
        let plaintext = plaintext.into();
        self.request(|reply| Command::SendMessage { plaintext, reply })
            .await?
            .map_err(RuntimeError::from)
    }

    /// Copy of the current state.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime has exited.
    pub async fn snapshot(&self) -> Result<RuntimeSnapshot, RuntimeError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Ask the runtime loop to exit. In-flight collaborator calls are left to
    /// finish on their own.
    pub async fn shutdown(&self) {
        // Already stopped is fine.
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| RuntimeError::Stopped)?;
        response.await.map_err(|_| RuntimeError::Stopped)
    }
}

/// Event loop driving one session controller and one message pipeline.
pub struct Runtime<E, B, C>
where
    E: Environment,
    B: ExchangeEngine,
    C: CipherProvider,
{
    env: E,
    engine: Arc<B>,
    cipher: Arc<C>,
    controller: SessionController,
    pipeline: MessagePipeline,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    notices: mpsc::UnboundedSender<RuntimeNotice>,
}

impl<E, B, C> Runtime<E, B, C>
where
    E: Environment,
    B: ExchangeEngine,
    C: CipherProvider,
{
    /// Create a runtime, its command handle and its notice stream.
    pub fn new(
        env: E,
        engine: Arc<B>,
        cipher: Arc<C>,
        config: RuntimeConfig,
    ) -> (Self, RuntimeHandle, mpsc::UnboundedReceiver<RuntimeNotice>) {
        let (commands_tx, commands) = mpsc::channel(config.command_buffer.max(1));
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (notices, notices_rx) = mpsc::unbounded_channel();

        let runtime = Self {
            env,
            engine,
            cipher,
            controller: SessionController::new(config.controller),
            pipeline: MessagePipeline::new(config.controller.gate),
            commands,
            completions_tx,
            completions_rx,
            notices,
        };

        (runtime, RuntimeHandle { commands: commands_tx }, notices_rx)
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) {
        tracing::debug!("runtime started");

        loop {
            match self.next_step().await {
                Step::Command(None | Some(Command::Shutdown)) => break,
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Completion(completion) => self.handle_completion(completion),
                Step::Tick => {
                    let actions = self.controller.tick(self.env.now());
                    self.execute_session(actions);
                },
            }
        }

        tracing::debug!("runtime stopped");
        self.notify(RuntimeNotice::Stopped);
    }

    async fn next_step(&mut self) -> Step {
        let deadline = self.controller.next_deadline();
        let env = self.env.clone();
        let timer = async move {
            match deadline {
                Some(deadline) => env.sleep(deadline.saturating_duration_since(env.now())).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            command = self.commands.recv() => Step::Command(command),
            Some(completion) = self.completions_rx.recv() => Step::Completion(completion),
            () = timer => Step::Tick,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartRun { config, reply } => {
                let result = self.controller.start_run(config).map(|(generation, actions)| {
                    self.execute_session(actions);
                    generation
                });
                let _ = reply.send(result);
            },
            Command::CancelRun { reply } => {
                let actions = self.controller.cancel_current_run();
                self.execute_session(actions);
                let _ = reply.send(());
            },
            Command::SendMessage { plaintext, reply } => {
                let sent = match self.controller.active_run() {
                    Some(run) => self.pipeline.send(plaintext, run),
                    None => Err(MessageError::NoKey),
                };
                let result = sent.map(|(id, actions)| {
                    self.execute_message(actions);
                    id
                });
                let _ = reply.send(result);
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            },
            Command::Shutdown => {},
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Batch { generation, result } => {
                let actions = self.controller.batch_received(generation, result, self.env.now());
                self.execute_session(actions);
            },
            Completion::Encrypted { id, result } => {
                match self.pipeline.encrypt_resolved(id, result, &self.controller) {
                    Ok(actions) => self.execute_message(actions),
                    Err(e) => tracing::warn!(%id, "encrypt answer rejected: {}", e),
                }
            },
            Completion::Decrypted { id, result } => {
                match self.pipeline.decrypt_resolved(id, result, &self.controller) {
                    Ok(actions) => self.execute_message(actions),
                    Err(e) => tracing::warn!(%id, "decrypt answer rejected: {}", e),
                }
            },
        }
    }

    fn execute_session(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            if let SessionAction::RequestBatch { generation, request } = action {
                let engine = Arc::clone(&self.engine);
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = engine.generate(&request).await.map_err(|e| e.to_string());
                    let _ = completions.send(Completion::Batch { generation, result });
                });
            }
            self.notify(RuntimeNotice::Session(action));
        }
    }

    fn execute_message(&mut self, actions: Vec<MessageAction>) {
        for action in actions {
            match &action {
                MessageAction::Encrypt { id, plaintext, key, .. } => {
                    let (id, plaintext, key) = (*id, plaintext.clone(), key.clone());
                    let cipher = Arc::clone(&self.cipher);
                    let completions = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let result =
                            cipher.encrypt(&plaintext, &key).await.map_err(|e| e.to_string());
                        let _ = completions.send(Completion::Encrypted { id, result });
                    });
                },
                MessageAction::Decrypt { id, ciphertext, key, .. } => {
                    let (id, ciphertext, key) = (*id, ciphertext.clone(), key.clone());
                    let cipher = Arc::clone(&self.cipher);
                    let completions = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let result =
                            cipher.decrypt(&ciphertext, &key).await.map_err(|e| e.to_string());
                        let _ = completions.send(Completion::Decrypted { id, result });
                    });
                },
                MessageAction::StageChanged { .. } | MessageAction::Discarded { .. } => {},
            }
            self.notify(RuntimeNotice::Message(action));
        }
    }

    fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            generation: self.controller.active_generation(),
            state: self.controller.state(),
            active_run: self.controller.active_run().cloned(),
            history: self.controller.history().to_vec(),
            messages: self.pipeline.records().cloned().collect(),
            gate: self.controller.gate_decision(),
        }
    }

    fn notify(&self, notice: RuntimeNotice) {
        // No observer is fine.
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bb84_core::{MessageStage, SessionLimits};
    use bb84_proto::{BatchRequest, Basis, Bit, ExchangeRecord};

    use super::*;
    use crate::{SystemEnv, collaborator::CollaboratorError};

    /// Engine that answers immediately with an unintercepted batch.
    struct CleanEngine;

    #[async_trait]
    impl ExchangeEngine for CleanEngine {
        async fn generate(
            &self,
            request: &BatchRequest,
        ) -> Result<ExchangeBatch, CollaboratorError> {
            let records = (0..request.particle_count)
                .map(|i| {
                    let bit = Bit::from_lsb(i as u8);
                    ExchangeRecord::new(bit, Basis::Diagonal, Basis::Diagonal, bit, None)
                })
                .collect();
            Ok(ExchangeBatch::from_records(records))
        }
    }

    /// Engine that always fails.
    struct OfflineEngine;

    #[async_trait]
    impl ExchangeEngine for OfflineEngine {
        async fn generate(&self, _: &BatchRequest) -> Result<ExchangeBatch, CollaboratorError> {
            Err(CollaboratorError::Connection { reason: "cannot connect".into() })
        }
    }

    /// Reverses the plaintext.
    struct ReversingCipher;

    #[async_trait]
    impl CipherProvider for ReversingCipher {
        async fn encrypt(
            &self,
            plaintext: &str,
            _: &[Bit],
        ) -> Result<Ciphertext, CollaboratorError> {
            Ok(Ciphertext::new(plaintext.chars().rev().collect::<String>()))
        }

        async fn decrypt(
            &self,
            ciphertext: &Ciphertext,
            _: &[Bit],
        ) -> Result<String, CollaboratorError> {
            Ok(ciphertext.as_str().chars().rev().collect())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            particle_count: 10,
            interception_probability: 0.0,
            pace: Duration::from_millis(1),
            hardware_mode: false,
        }
    }

    async fn wait_for(
        notices: &mut mpsc::UnboundedReceiver<RuntimeNotice>,
        mut matches: impl FnMut(&RuntimeNotice) -> bool,
    ) -> RuntimeNotice {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notice = notices.recv().await.unwrap();
                if matches(&notice) {
                    return notice;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn run_then_message_round_trip() {
        let (runtime, handle, mut notices) = Runtime::new(
            SystemEnv::new(),
            Arc::new(CleanEngine),
            Arc::new(ReversingCipher),
            RuntimeConfig::default(),
        );
        tokio::spawn(runtime.run());

        let generation = handle.start_run(config()).await.unwrap();
        let notice = wait_for(&mut notices, |n| {
            matches!(n, RuntimeNotice::Session(SessionAction::RunCompleted { .. }))
        })
        .await;
        let RuntimeNotice::Session(SessionAction::RunCompleted { generation: done, summary }) =
            notice
        else {
            panic!("unexpected notice");
        };
        assert_eq!(done, generation);
        assert_eq!(summary.sifted_key.len(), 10);

        let id = handle.send_message("hello").await.unwrap();
        wait_for(&mut notices, |n| {
            matches!(n, RuntimeNotice::Message(MessageAction::StageChanged {
                stage: MessageStage::Delivered,
                ..
            }))
        })
        .await;

        let snapshot = handle.snapshot().await.unwrap();
        let message = snapshot.messages.iter().find(|m| m.id() == id).unwrap();
        assert_eq!(message.decrypted_text(), Some("hello"));
        assert_eq!(message.ciphertext(), Some(&Ciphertext::new("olleh")));

        handle.shutdown().await;
        wait_for(&mut notices, |n| matches!(n, RuntimeNotice::Stopped)).await;
        assert_eq!(handle.snapshot().await.unwrap_err(), RuntimeError::Stopped);
    }

    #[tokio::test]
    async fn engine_failure_fails_run() {
        let (runtime, handle, mut notices) = Runtime::new(
            SystemEnv::new(),
            Arc::new(OfflineEngine),
            Arc::new(ReversingCipher),
            RuntimeConfig::default(),
        );
        tokio::spawn(runtime.run());

        handle.start_run(config()).await.unwrap();
        let notice = wait_for(&mut notices, |n| {
            matches!(n, RuntimeNotice::Session(SessionAction::RunFailed { .. }))
        })
        .await;
        let RuntimeNotice::Session(SessionAction::RunFailed { error, .. }) = notice else {
            panic!("unexpected notice");
        };
        assert!(error.is_retryable());

        let error = handle.send_message("hello").await.unwrap_err();
        assert_eq!(error, RuntimeError::Message(MessageError::NoKey));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let limits = SessionLimits { max_particles: 20, ..SessionLimits::default() };
        let mut runtime_config = RuntimeConfig::default();
        runtime_config.controller.limits = limits;
        let (runtime, handle, _notices) = Runtime::new(
            SystemEnv::new(),
            Arc::new(CleanEngine),
            Arc::new(ReversingCipher),
            runtime_config,
        );
        tokio::spawn(runtime.run());

        let result = handle.start_run(SessionConfig { particle_count: 30, ..config() }).await;
        assert!(matches!(result, Err(RuntimeError::Session(SessionError::InvalidConfig { .. }))));
        assert_eq!(handle.snapshot().await.unwrap().state, RunState::Idle);
    }
}
