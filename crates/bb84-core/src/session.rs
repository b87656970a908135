//! Session controller state machine.
//!
//! The `SessionController` owns the generation counter and the active
//! [`SessionRun`]. It requests one batch per run, drives a
//! [`PlaybackSequencer`] over it, and derives the keys once playback ends.
//!
//! # Generations
//!
//! Every run gets a fresh [`Generation`]. Starting a run or cancelling the
//! current one advances the counter, and any response tagged with an older
//! generation is dropped on arrival. There is no abort of in-flight work;
//! suppression is the only cancellation mechanism.
//!
//! # Run lifecycle
//!
//! ```text
//!   Idle ──start──► Requesting ──batch──► Playing ──complete──► Completed
//!                        │                   │
//!                        └──error──► Failed  └──cancel──► Cancelled
//! ```
//!
//! A superseded run moves into history unchanged (except an in-flight run,
//! which becomes `Cancelled` first) and is never mutated again.

use std::{
    fmt,
    time::{Duration, Instant},
};

use bb84_proto::{BatchRequest, Bit, ExchangeBatch, ExchangeRecord, ProtoError};

use crate::{
    error::SessionError,
    event::{DiscardReason, RunSummary, SessionAction, SessionEvent},
    gate::{DenyReason, GateDecision, SecurityGate},
    message::KeySource,
    metric::{MetricEstimator, mismatch_percent},
    playback::{PlaybackEvent, PlaybackSequencer},
};

/// Monotonically increasing run token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Token with the given value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw counter value.
    pub const fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepted ranges for run parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Smallest accepted particle count.
    pub min_particles: u32,
    /// Largest accepted particle count.
    pub max_particles: u32,
    /// Longest accepted pace unit.
    pub max_pace: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self { min_particles: 10, max_particles: 50, max_pace: Duration::from_secs(10) }
    }
}

/// Parameters of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Number of qubits to exchange.
    pub particle_count: u32,
    /// Probability the interceptor measures a qubit, in `[0, 1]`.
    pub interception_probability: f64,
    /// Playback pace unit. One record is shown for 30 units.
    pub pace: Duration,
    /// Forwarded to the engine untouched.
    pub hardware_mode: bool,
}

impl SessionConfig {
    /// Check the parameters against `limits`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first parameter out of range.
    pub fn validate(&self, limits: &SessionLimits) -> Result<(), SessionError> {
        if !(limits.min_particles..=limits.max_particles).contains(&self.particle_count) {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "particle count {} outside {}..={}",
                    self.particle_count, limits.min_particles, limits.max_particles
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.interception_probability) {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "interception probability {} outside [0, 1]",
                    self.interception_probability
                ),
            });
        }
        if self.pace.is_zero() || self.pace > limits.max_pace {
            return Err(SessionError::InvalidConfig {
                reason: format!("pace {:?} outside (0, {:?}]", self.pace, limits.max_pace),
            });
        }
        Ok(())
    }

    /// The engine-facing part of the config. Pace stays local.
    pub fn batch_request(&self) -> BatchRequest {
        BatchRequest {
            particle_count: self.particle_count,
            interception_probability: self.interception_probability,
            hardware_mode: self.hardware_mode,
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerConfig {
    /// Run parameter bounds.
    pub limits: SessionLimits,
    /// Gate policy for completed runs.
    pub gate: SecurityGate,
}

/// State of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// No run has been requested.
    Idle,
    /// Waiting for the engine.
    Requesting,
    /// Replaying the batch.
    Playing,
    /// Playback finished; keys are derived.
    Completed,
    /// The engine failed; nothing was played.
    Failed,
    /// Cancelled or superseded while in flight.
    Cancelled,
}

impl RunState {
    /// Whether the run is still waiting on the engine or on playback.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Requesting | Self::Playing)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Requesting => "Requesting",
            Self::Playing => "Playing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// One run and everything accumulated for it.
///
/// Records only grow while `Playing`. Keys stay empty until `Completed`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRun {
    id: Generation,
    config: SessionConfig,
    state: RunState,
    records: Vec<ExchangeRecord>,
    metric: MetricEstimator,
    sifted_key: Vec<Bit>,
    interceptor_key: Vec<Bit>,
    mismatch_percent: f64,
    failure: Option<SessionError>,
}

impl SessionRun {
    fn new(id: Generation, config: SessionConfig) -> Self {
        Self {
            id,
            config,
            state: RunState::Idle,
            records: Vec::new(),
            metric: MetricEstimator::new(),
            sifted_key: Vec::new(),
            interceptor_key: Vec::new(),
            mismatch_percent: 0.0,
            failure: None,
        }
    }

    /// Generation token of this run.
    pub fn id(&self) -> Generation {
        self.id
    }

    /// Parameters the run was started with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Records played so far. Empty for a cancelled run.
    pub fn records(&self) -> &[ExchangeRecord] {
        match self.state {
            RunState::Cancelled => &[],
            _ => &self.records,
        }
    }

    /// Records played so far, including those withheld after cancellation.
    pub fn diagnostic_records(&self) -> &[ExchangeRecord] {
        &self.records
    }

    /// Interception metric in percent. Zero for a cancelled run, whose
    /// records are withheld.
    pub fn metric(&self) -> f64 {
        match self.state {
            RunState::Cancelled => 0.0,
            _ => self.metric.percent(),
        }
    }

    /// Sifted key. Empty unless completed.
    pub fn sifted_key(&self) -> &[Bit] {
        &self.sifted_key
    }

    /// Interceptor key. Empty unless completed.
    pub fn interceptor_key(&self) -> &[Bit] {
        &self.interceptor_key
    }

    /// Receiver/sender disagreement on basis-matched positions, in percent.
    pub fn mismatch_percent(&self) -> f64 {
        self.mismatch_percent
    }

    /// Why the run failed, if it did.
    pub fn failure(&self) -> Option<&SessionError> {
        self.failure.as_ref()
    }

    /// Gate verdict for this run under `gate`.
    pub fn gate_decision(&self, gate: &SecurityGate) -> GateDecision {
        gate.evaluate(self.sifted_key.len(), self.metric())
    }

    fn summary(&self, gate: &SecurityGate) -> RunSummary {
        RunSummary {
            record_count: self.records.len(),
            metric: self.metric(),
            sifted_key: self.sifted_key.clone(),
            interceptor_key: self.interceptor_key.clone(),
            mismatch_percent: self.mismatch_percent,
            gate: self.gate_decision(gate),
        }
    }
}

/// Top-level run state machine.
///
/// Pure state machine: returns actions, the driver performs the engine call
/// and feeds time forward.
#[derive(Debug)]
pub struct SessionController {
    config: ControllerConfig,
    generation: Generation,
    active: Option<SessionRun>,
    playback: Option<Playback>,
    history: Vec<SessionRun>,
}

/// Playback in progress for the active run.
#[derive(Debug)]
struct Playback {
    sequencer: PlaybackSequencer,
    reported_sifted_key: Vec<Bit>,
}

impl SessionController {
    /// Controller with no runs.
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            generation: Generation::default(),
            active: None,
            playback: None,
            history: Vec::new(),
        }
    }

    /// Controller configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Most recently issued generation.
    pub fn active_generation(&self) -> Generation {
        self.generation
    }

    /// The run owning the active generation, if any.
    pub fn active_run(&self) -> Option<&SessionRun> {
        self.active.as_ref().filter(|run| run.id == self.generation)
    }

    /// State of the active run, `Idle` when there is none.
    pub fn state(&self) -> RunState {
        self.active_run().map_or(RunState::Idle, SessionRun::state)
    }

    /// Superseded runs, oldest first.
    pub fn history(&self) -> &[SessionRun] {
        &self.history
    }

    /// Look up a run by generation, active or historical.
    pub fn run(&self, generation: Generation) -> Option<&SessionRun> {
        self.active_run()
            .filter(|run| run.id == generation)
            .or_else(|| self.history.iter().find(|run| run.id == generation))
    }

    /// Gate verdict for the active run. `NoKey` when there is none.
    pub fn gate_decision(&self) -> GateDecision {
        self.active_run().map_or(GateDecision::Denied(DenyReason::NoKey), |run| {
            run.gate_decision(&self.config.gate)
        })
    }

    /// When the next playback cue is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.playback.as_ref().and_then(|p| p.sequencer.next_deadline())
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` from a rejected `StartRun`.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<SessionAction>, SessionError> {
        match event {
            SessionEvent::StartRun { config } => self.start_run(config).map(|(_, actions)| actions),
            SessionEvent::BatchReceived { generation, result, now } => {
                Ok(self.batch_received(generation, result, now))
            },
            SessionEvent::Tick { now } => Ok(self.tick(now)),
            SessionEvent::CancelRun => Ok(self.cancel_current_run()),
        }
    }

    /// Start a new run, cancelling the current one if it is in flight.
    ///
    /// Returns the new generation and a `RequestBatch` action tagged with it.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` before any state changes.
    pub fn start_run(
        &mut self,
        config: SessionConfig,
    ) -> Result<(Generation, Vec<SessionAction>), SessionError> {
        config.validate(&self.config.limits)?;

        let mut actions = Vec::new();
        self.retire_active(&mut actions);

        self.generation = self.generation.next();
        let generation = self.generation;
        let mut run = SessionRun::new(generation, config);
        run.state = RunState::Requesting;
        self.active = Some(run);

        tracing::info!(
            %generation,
            particles = config.particle_count,
            interception_probability = config.interception_probability,
            "run requested"
        );

        actions.push(SessionAction::StateChanged { generation, state: RunState::Requesting });
        actions.push(SessionAction::RequestBatch { generation, request: config.batch_request() });
        Ok((generation, actions))
    }

    /// Apply the engine's answer for `generation`.
    ///
    /// Stale or unexpected answers produce a single `Discarded` action.
    pub fn batch_received(
        &mut self,
        generation: Generation,
        result: Result<ExchangeBatch, String>,
        now: Instant,
    ) -> Vec<SessionAction> {
        let current = self.generation;
        let Some(run) = self.active.as_mut().filter(|run| run.id == generation) else {
            tracing::debug!(%generation, %current, "discarding stale batch");
            return vec![SessionAction::Discarded {
                generation,
                current,
                reason: DiscardReason::StaleGeneration,
            }];
        };
        if run.state != RunState::Requesting {
            tracing::debug!(%generation, state = %run.state, "discarding unexpected batch");
            return vec![SessionAction::Discarded {
                generation,
                current,
                reason: DiscardReason::NotAwaitingBatch,
            }];
        }

        let batch = result.and_then(|batch| {
            let expected = run.config.particle_count as usize;
            if batch.records.len() == expected {
                Ok(batch)
            } else {
                Err(ProtoError::BatchLength { expected, actual: batch.records.len() }.to_string())
            }
        });

        let batch = match batch {
            Ok(batch) => batch,
            Err(message) => {
                tracing::warn!(%generation, %message, "run failed");
                let error = SessionError::Backend { message };
                run.state = RunState::Failed;
                run.failure = Some(error.clone());
                return vec![
                    SessionAction::StateChanged { generation, state: RunState::Failed },
                    SessionAction::RunFailed { generation, error },
                ];
            },
        };

        tracing::debug!(
            %generation,
            reported_error_rate = batch.reported.error_rate,
            reported_interceptor_bits = batch.reported.interceptor_key.len(),
            "engine reported values"
        );
        tracing::info!(%generation, records = batch.records.len(), "playback started");
        run.state = RunState::Playing;
        let mut actions =
            vec![SessionAction::StateChanged { generation, state: RunState::Playing }];

        let mut sequencer = PlaybackSequencer::new(batch.records, run.config.pace);
        let events = sequencer.start(now);
        self.playback =
            Some(Playback { sequencer, reported_sifted_key: batch.reported.sifted_key });
        self.apply_playback(events, &mut actions);
        actions
    }

    /// Emit playback cues due at `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<SessionAction> {
        let Some(playback) = self.playback.as_mut() else {
            return Vec::new();
        };
        let events = playback.sequencer.poll(now);

        let mut actions = Vec::new();
        self.apply_playback(events, &mut actions);
        actions
    }

    /// Cancel the active run and advance the generation.
    ///
    /// An in-flight run becomes `Cancelled`; a finished run is retired as is,
    /// which withdraws its key. No-op when there is no active run.
    pub fn cancel_current_run(&mut self) -> Vec<SessionAction> {
        if self.active.is_none() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.retire_active(&mut actions);
        self.generation = self.generation.next();
        actions
    }

    fn retire_active(&mut self, actions: &mut Vec<SessionAction>) {
        let Some(mut run) = self.active.take() else {
            return;
        };
        let generation = run.id;

        if run.state.is_in_flight() {
            if let Some(mut playback) = self.playback.take() {
                for event in playback.sequencer.cancel() {
                    if let PlaybackEvent::InterceptionSignal { active, .. } = event {
                        actions.push(SessionAction::InterceptionSignal { generation, active });
                    }
                }
            }
            run.state = RunState::Cancelled;
            tracing::info!(%generation, played = run.records.len(), "run cancelled");
            actions.push(SessionAction::StateChanged { generation, state: RunState::Cancelled });
        }

        self.history.push(run);
    }

    fn apply_playback(&mut self, events: Vec<PlaybackEvent>, actions: &mut Vec<SessionAction>) {
        let Some(run) = self.active.as_mut() else {
            return;
        };
        let generation = run.id;

        for event in events {
            match event {
                PlaybackEvent::RecordDisplay { index, record } => {
                    run.records.push(record);
                    run.metric.record(&record);
                    actions.push(SessionAction::RecordAppended {
                        generation,
                        index,
                        record,
                        metric: run.metric.percent(),
                    });
                },
                PlaybackEvent::InterceptionSignal { active, .. } => {
                    actions.push(SessionAction::InterceptionSignal { generation, active });
                },
                PlaybackEvent::SequenceComplete => {
                    let reported = self.playback.take().map(|p| p.reported_sifted_key);
                    complete(run, reported.unwrap_or_default());
                    actions.push(SessionAction::StateChanged {
                        generation,
                        state: RunState::Completed,
                    });
                    actions.push(SessionAction::RunCompleted {
                        generation,
                        summary: run.summary(&self.config.gate),
                    });
                },
                PlaybackEvent::SequenceCancelled => {},
            }
        }
    }
}

/// Derive keys from the full record set. Runs exactly once per run.
fn complete(run: &mut SessionRun, reported_sifted_key: Vec<Bit>) {
    run.sifted_key =
        run.records.iter().filter(|r| r.bases_match()).map(ExchangeRecord::sender_bit).collect();
    run.interceptor_key = run.records.iter().filter_map(ExchangeRecord::interceptor_bit).collect();
    run.mismatch_percent = mismatch_percent(&run.records);
    run.state = RunState::Completed;

    if !reported_sifted_key.is_empty() && reported_sifted_key != run.sifted_key {
        tracing::warn!(
            generation = %run.id,
            reported = reported_sifted_key.len(),
            derived = run.sifted_key.len(),
            "engine sifted key disagrees with records"
        );
    }

    tracing::info!(
        generation = %run.id,
        metric = run.metric(),
        sifted = run.sifted_key.len(),
        intercepted = run.interceptor_key.len(),
        "run completed"
    );
}

impl KeySource for SessionController {
    fn active_generation(&self) -> Generation {
        self.generation
    }

    fn active_key(&self) -> Option<&[Bit]> {
        self.active_run()
            .filter(|run| run.state == RunState::Completed && !run.sifted_key.is_empty())
            .map(SessionRun::sifted_key)
    }
}
