//! BB84 runtime.
//!
//! Drives the Sans-IO core against real collaborators:
//! - Tokio for the event loop and collaborator tasks
//! - reqwest for the HTTP engine and cipher
//! - System time and OS randomness
//!
//! ## Architecture
//!
//! ```text
//! bb84-runtime
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ HttpBackend        (engine + cipher over HTTP)
//!   ├─ Runtime            (event loop, generation-tagged completions)
//!   ├─ SessionController  (bb84-core)
//!   └─ MessagePipeline    (bb84-core)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod collaborator;
mod config;
mod error;
mod http;
mod runtime;
mod system_env;

pub use collaborator::{CipherProvider, CollaboratorError, ExchangeEngine};
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use http::{HttpBackend, HttpBackendConfig};
pub use runtime::{Runtime, RuntimeHandle, RuntimeNotice, RuntimeSnapshot};
pub use system_env::SystemEnv;
