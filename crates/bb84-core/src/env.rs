//! Clock, sleep and randomness behind one trait.
//!
//! Playback pacing and the in-process exchange engine both need time and
//! coin flips. Routing them through [`Environment`] lets the harness run a
//! 45 second playback on Turmoil's virtual clock with a seeded generator,
//! while the binary uses the system clock and OS entropy.
//!
//! The controller and pipeline never hold an `Environment`. They receive
//! `now` as an argument, and only the runtime reads the clock or sleeps.
//!
//! # Invariants
//!
//! - `now()` never goes backwards
//! - Equal seeds give equal `random_bytes()` streams in simulation

use std::time::{Duration, Instant};

/// Time and randomness source for the runtime and the simulated engine.
///
/// Methods are infallible. A production entropy failure is logged by the
/// implementation rather than surfaced here.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current instant. Never earlier than a previous call.
    fn now(&self) -> Instant;

    /// Wait until `duration` has passed on this environment's clock.
    ///
    /// Used by the runtime to wait for the next playback cue and by simulated
    /// collaborators to model latency.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` from the environment's generator.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// One random `u64`, big-endian from eight drawn bytes.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Returns `true` with probability `p`.
    ///
    /// `p` is clamped to `[0, 1]`; `p == 0` never succeeds and `p == 1`
    /// always does.
    fn random_bool(&self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        // 53 random mantissa bits give a uniform value in [0, 1).
        let sample = (self.random_u64() >> 11) as f64 / (1u64 << 53) as f64;
        sample < p
    }
}
