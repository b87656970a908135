//! Deterministic simulation harness for the BB84 run orchestration core.
//!
//! Turmoil-backed [`SimEnv`], an in-process exchange engine and a scripted
//! cipher let the async runtime run under virtual time with reproducible
//! randomness. Playback timing, cancellation races and late collaborator
//! answers replay exactly from a seed.
//!
//! # Model-Based Testing
//!
//! The [`model`] module drives the Sans-IO state machines directly from
//! generated operation sequences and checks their action streams against an
//! oracle. The fuzz target uses the same world.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fault;
pub mod model;
pub mod observer;
pub mod scripted_cipher;
pub mod sim_engine;
pub mod sim_env;
pub mod sim_runtime;

pub use fault::{CipherFault, EngineFault, FaultQueue};
pub use model::{
    Operation, OperationError, OperationResult, Oracle, RunParams, SimWorld, SmallMessage,
};
pub use observer::{Observer, TimedNotice};
pub use scripted_cipher::ScriptedCipher;
pub use sim_engine::SimEngine;
pub use sim_env::SimEnv;
pub use sim_runtime::SimRuntime;
