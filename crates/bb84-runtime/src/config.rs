//! Runtime configuration.

use bb84_core::ControllerConfig;

/// Configuration for [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeConfig {
    /// Session limits and gate policy.
    pub controller: ControllerConfig,
    /// Capacity of the command channel behind [`RuntimeHandle`](crate::RuntimeHandle).
    pub command_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { controller: ControllerConfig::default(), command_buffer: 64 }
    }
}
