//! Operations for model-based testing.
//!
//! Operations are generated by proptest or the fuzzer and applied to a
//! [`SimWorld`](super::SimWorld). Collaborator answers are operations too,
//! so arbitrary interleavings of user input and late responses are explored.

use std::time::Duration;

use arbitrary::Arbitrary;
use bb84_core::SessionConfig;

/// Operations that can be applied to the world.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// User starts a run.
    StartRun(RunParams),

    /// User cancels the current run.
    CancelRun,

    /// Advance the clock and deliver due playback cues.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },

    /// The engine answers one outstanding request.
    DeliverBatch {
        /// Picks the request (modulo the number outstanding).
        slot: u8,
        /// Answer with an error instead of a batch.
        fail: bool,
    },

    /// User sends a message.
    SendMessage(SmallMessage),

    /// The cipher answers one outstanding encrypt call.
    ResolveEncrypt {
        /// Picks the call (modulo the number outstanding).
        slot: u8,
        /// Answer with an error.
        fail: bool,
    },

    /// The cipher answers one outstanding decrypt call.
    ResolveDecrypt {
        /// Picks the call (modulo the number outstanding).
        slot: u8,
        /// Answer with an error.
        fail: bool,
    },
}

/// Compact run parameters.
///
/// Out-of-range values are kept on purpose so validation is exercised.
#[derive(Debug, Clone, Copy, Arbitrary)]
pub struct RunParams {
    /// Qubit count; the default limits accept 10 to 50.
    pub particles: u8,
    /// Interception probability in percent; above 100 is invalid.
    pub interception_percent: u8,
    /// Pace unit in milliseconds; zero is invalid.
    pub pace_ms: u8,
}

impl RunParams {
    /// Expand to a session config.
    pub fn to_config(self) -> SessionConfig {
        SessionConfig {
            particle_count: u32::from(self.particles),
            interception_probability: f64::from(self.interception_percent) / 100.0,
            pace: Duration::from_millis(u64::from(self.pace_ms)),
            hardware_mode: false,
        }
    }
}

/// Small message content for testing.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallMessage {
    /// Message seed.
    pub seed: u8,
    /// Length hint (0-3 maps to empty/blank/short/long).
    pub size_class: u8,
}

impl SmallMessage {
    /// Expand to message text.
    pub fn to_text(&self) -> String {
        let len = match self.size_class % 4 {
            0 => return String::new(),
            1 => return "   ".to_string(),
            2 => 4,
            _ => 40,
        };

        (0..len).map(|i| char::from(b'a' + self.seed.wrapping_add(i) % 26)).collect()
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Operation was refused.
    Error(OperationError),
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if operation was refused.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

/// Refusals an operation can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Run parameters were rejected.
    InvalidConfig,

    /// Message text was blank.
    EmptyMessage,

    /// No completed run with a key.
    NoKey,

    /// The gate refused the run's metric.
    SecurityDenied,

    /// No outstanding collaborator call to answer.
    NothingPending,
}
