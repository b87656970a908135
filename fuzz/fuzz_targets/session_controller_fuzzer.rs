//! Fuzz target for the session controller and message pipeline
//!
//! Prevent stale collaborator answers from mutating current state
//!
//! # Strategy
//!
//! - Operation sequences: arbitrary interleavings of starts, cancels, clock
//!   advances and collaborator answers
//! - Late answers: engine and cipher calls are answered in any order, long
//!   after the run that issued them was superseded
//! - Invalid input: out-of-range particle counts, probabilities and paces
//!
//! # Invariants
//!
//! - Records are appended in index order, only to the active run
//! - A cancelled run exposes no records and no key
//! - The sifted key is exactly the basis-matched filter over the records
//! - Messages advance only while their bound run is active
//! - Every outstanding call and cue drains, and the world settles
//! - NEVER panic on any sequence

#![no_main]

use arbitrary::Arbitrary;
use bb84_harness::{Operation, SimWorld};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    /// Seed for the engine's randomness.
    seed: u64,
    /// Operation sequence to apply.
    operations: Vec<Operation>,
}

fuzz_target!(|input: FuzzInput| {
    let mut world = SimWorld::new(input.seed);

    for op in &input.operations {
        let _ = world.apply(op);
    }

    let violations = world.final_violations();
    assert!(violations.is_empty(), "violations: {violations:?}");

    world.settle();
    let violations = world.final_violations();
    assert!(violations.is_empty(), "violations after settling: {violations:?}");
    assert_eq!(world.pending_batches(), 0);
    assert_eq!(world.pending_cipher_calls(), 0);
});
