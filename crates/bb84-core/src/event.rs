//! Session events and actions.
//!
//! Events are the inputs the driver feeds to
//! [`SessionController::handle`](crate::SessionController::handle); actions
//! are the instructions and observations it gets back.

use std::time::Instant;

use bb84_proto::{BatchRequest, Bit, ExchangeBatch, ExchangeRecord};

use crate::{
    error::SessionError,
    gate::GateDecision,
    session::{Generation, RunState, SessionConfig},
};

/// Input to the session controller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Begin a new run, superseding the current one.
    StartRun {
        /// Parameters for the new run.
        config: SessionConfig,
    },

    /// The engine answered a batch request.
    BatchReceived {
        /// Generation the request was issued under.
        generation: Generation,
        /// The batch, or the engine/transport error text.
        result: Result<ExchangeBatch, String>,
        /// Arrival time, used as the start of playback.
        now: Instant,
    },

    /// Time advanced; emit due playback cues.
    Tick {
        /// Current time.
        now: Instant,
    },

    /// Cancel the active run.
    CancelRun,
}

/// Why a response was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The response belongs to a superseded generation.
    StaleGeneration,
    /// The generation is current but the run is no longer awaiting a batch.
    NotAwaitingBatch,
}

/// Values derived once a run completes.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Number of records played.
    pub record_count: usize,
    /// Interception metric in percent.
    pub metric: f64,
    /// Sender bits at basis-matched positions, in index order.
    pub sifted_key: Vec<Bit>,
    /// Interceptor bits at intercepted positions, in index order.
    pub interceptor_key: Vec<Bit>,
    /// Receiver/sender disagreement over basis-matched positions, in percent.
    pub mismatch_percent: f64,
    /// Gate verdict for the completed run.
    pub gate: GateDecision,
}

/// Output of the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Ask the engine for a batch. Tag the answer with `generation`.
    RequestBatch {
        /// Generation the answer must be tagged with.
        generation: Generation,
        /// Parameters to forward.
        request: BatchRequest,
    },

    /// A run changed state.
    StateChanged {
        /// Run that changed.
        generation: Generation,
        /// New state.
        state: RunState,
    },

    /// A record was appended to the active run.
    RecordAppended {
        /// Run the record belongs to.
        generation: Generation,
        /// Position in the batch.
        index: usize,
        /// The record.
        record: ExchangeRecord,
        /// Metric after this append, in percent.
        metric: f64,
    },

    /// The transient interception indicator changed.
    InterceptionSignal {
        /// Run the signal belongs to.
        generation: Generation,
        /// Whether interception is being shown.
        active: bool,
    },

    /// Playback finished and keys were derived.
    RunCompleted {
        /// Completed run.
        generation: Generation,
        /// Derived values.
        summary: RunSummary,
    },

    /// The run failed before playback.
    RunFailed {
        /// Failed run.
        generation: Generation,
        /// Always a `Backend` error.
        error: SessionError,
    },

    /// A response was ignored.
    Discarded {
        /// Generation the response was tagged with.
        generation: Generation,
        /// Generation active when it arrived.
        current: Generation,
        /// Why it was ignored.
        reason: DiscardReason,
    },
}
