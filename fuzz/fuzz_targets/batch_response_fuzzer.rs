//! Fuzz target for engine response translation
//!
//! Prevent malformed engine output from reaching the core as records
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary input parsed as a batch response body
//! - Expected length: arbitrary requested particle count
//!
//! # Invariants
//!
//! - A translated batch has exactly the requested number of records
//! - An interceptor bit is present exactly when the row is intercepted
//! - Re-rendering a translated batch and translating again yields the same
//!   records
//! - NEVER panic on malformed input

#![no_main]

use arbitrary::Arbitrary;
use bb84_proto::wire::BatchResponse;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    expected: u8,
    body: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let Ok(response) = serde_json::from_slice::<BatchResponse>(&input.body) else {
        return;
    };
    let expected = usize::from(input.expected);
    let Ok(batch) = response.into_batch(expected) else {
        return;
    };

    assert_eq!(batch.records.len(), expected);
    for record in &batch.records {
        assert_eq!(record.intercepted(), record.interceptor_bit().is_some());
    }

    let again = BatchResponse::from_batch(&batch)
        .into_batch(expected)
        .expect("rendered batch translates");
    assert_eq!(again.records, batch.records);
});
