//! BB84 exchange data model
//!
//! Strongly typed representation of the per-qubit exchange outcomes produced
//! by an external simulation engine, plus the translation layer for the JSON
//! shapes the engine and cipher collaborators speak.
//!
//! The core never sees wire rows. Everything crossing the boundary is turned
//! into an [`ExchangeRecord`] by [`wire::BatchResponse::into_batch`], which
//! rejects rows whose flags contradict their bits and bases.
//!
//! # Modules
//!
//! - [`bit`]: `Bit` and `Basis`
//! - [`record`]: `ExchangeRecord`, `ExchangeBatch`, `BatchRequest`,
//!   `Ciphertext`
//! - [`wire`]: JSON request/response payloads for the three collaborators
//! - [`errors`]: `ProtoError`

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bit;
pub mod errors;
pub mod record;
pub mod wire;

pub use bit::{Basis, Bit};
pub use errors::ProtoError;
pub use record::{BatchRequest, Ciphertext, ExchangeBatch, ExchangeRecord, ReportedResults};
