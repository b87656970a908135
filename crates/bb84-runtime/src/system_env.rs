//! Production environment backed by the system clock and OS entropy.

use std::time::{Duration, Instant};

use bb84_core::Environment;

/// Environment for the `bb84` binary: wall-clock playback, OS coin flips.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// The system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(error) = getrandom::fill(buffer) {
            // Zero bytes keep the runtime loop alive on a broken entropy source.
            tracing::error!(%error, "os entropy unavailable");
            buffer.fill(0);
        }
    }
}
