//! Model-based testing over the synchronous state machines.
//!
//! A [`SimWorld`] applies generated [`Operation`]s to the real controller and
//! pipeline, answering collaborator calls in whatever order the operations
//! dictate. An [`Oracle`] watches every emitted action and records any
//! broken ordering or staleness guarantee.

pub mod operation;
mod oracle;
mod world;

pub use operation::{Operation, OperationError, OperationResult, RunParams, SmallMessage};
pub use oracle::Oracle;
pub use world::SimWorld;
