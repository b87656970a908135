//! BB84 run orchestration core
//!
//! Sans-IO state machines that turn an engine-produced exchange batch into a
//! played-back run with a derived key, and gate a secure messaging pipeline
//! on that key.
//!
//! # Architecture
//!
//! Every component is a pure state machine that:
//! - Receives events from the caller (engine answers, cipher answers, ticks,
//!   user intents)
//! - Produces actions for the caller to execute (request a batch, encrypt,
//!   decrypt) and observations to render
//! - Takes `now` as an argument instead of reading a clock
//!
//! Stale asynchronous answers are detected by generation token and dropped.
//!
//! # Components
//!
//! - [`SessionController`]: run lifecycle, generation counter, key derivation
//! - [`PlaybackSequencer`]: timed, cancellable replay of a batch
//! - [`MetricEstimator`]: incremental interception percentage
//! - [`SecurityGate`]: key/metric policy for crypto operations
//! - [`MessagePipeline`]: encrypt/decrypt round trips bound to a generation
//! - [`insights`]: per-record explanations
//! - [`Environment`]: time and randomness for drivers

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod error;
pub mod event;
pub mod gate;
pub mod insight;
pub mod message;
pub mod metric;
pub mod playback;
pub mod session;

pub use env::Environment;
pub use error::{FailureReason, MessageError, SessionError};
pub use event::{DiscardReason, RunSummary, SessionAction, SessionEvent};
pub use gate::{DEFAULT_THRESHOLD_PERCENT, DenyReason, GateDecision, SecurityGate};
pub use insight::{Insight, insights};
pub use message::{
    KeySource, MessageAction, MessageDiscard, MessageId, MessagePipeline, MessageStage,
    SecureMessageRecord,
};
pub use metric::{MetricEstimator, mismatch_percent, round_percent};
pub use playback::{PACE_MULTIPLIER, PlaybackEvent, PlaybackSequencer};
pub use session::{
    ControllerConfig, Generation, RunState, SessionConfig, SessionController, SessionLimits,
    SessionRun,
};
