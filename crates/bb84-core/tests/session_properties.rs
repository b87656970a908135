//! Property-based tests for run orchestration
//!
//! These tests drive the session controller with arbitrary batches, tick
//! schedules and cancellation points, and check the derived values against
//! direct computations over the batch.

#![allow(clippy::expect_used)]

use std::time::{Duration, Instant};

use bb84_core::{
    ControllerConfig, DenyReason, GateDecision, MetricEstimator, RunState, SecurityGate,
    SessionAction, SessionConfig, SessionController,
};
use bb84_proto::{Basis, Bit, ExchangeBatch, ExchangeRecord};
use proptest::prelude::*;

fn bit(value: bool) -> Bit {
    if value { Bit::One } else { Bit::Zero }
}

fn basis(diagonal: bool) -> Basis {
    if diagonal { Basis::Diagonal } else { Basis::Rectilinear }
}

fn arb_record() -> impl Strategy<Value = ExchangeRecord> {
    any::<(bool, bool, bool, bool, Option<bool>)>().prop_map(
        |(sender_bit, sender_basis, receiver_basis, receiver_bit, interceptor)| {
            ExchangeRecord::new(
                bit(sender_bit),
                basis(sender_basis),
                basis(receiver_basis),
                bit(receiver_bit),
                interceptor.map(bit),
            )
        },
    )
}

fn arb_batch() -> impl Strategy<Value = Vec<ExchangeRecord>> {
    prop::collection::vec(arb_record(), 10..=50)
}

fn start(controller: &mut SessionController, records: &[ExchangeRecord], now: Instant) {
    let config = SessionConfig {
        particle_count: records.len() as u32,
        interception_probability: 0.5,
        pace: Duration::from_millis(5),
        hardware_mode: false,
    };
    let Ok((generation, _)) = controller.start_run(config) else {
        return;
    };
    controller.batch_received(generation, Ok(ExchangeBatch::from_records(records.to_vec())), now);
}

fn appended(actions: &[SessionAction]) -> Vec<usize> {
    actions
        .iter()
        .filter_map(|a| match a {
            SessionAction::RecordAppended { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

#[test]
fn prop_metric_matches_formula() {
    proptest!(|(flags in prop::collection::vec(any::<bool>(), 0..200))| {
        let records: Vec<ExchangeRecord> = flags
            .iter()
            .map(|&intercepted| {
                ExchangeRecord::new(
                    Bit::Zero,
                    Basis::Rectilinear,
                    Basis::Rectilinear,
                    Bit::Zero,
                    intercepted.then_some(Bit::One),
                )
            })
            .collect();

        let metric = MetricEstimator::over(&records).percent();
        let k = flags.iter().filter(|f| **f).count();
        let expected = if flags.is_empty() {
            0.0
        } else {
            (100.0 * k as f64 / flags.len() as f64 * 100.0).round() / 100.0
        };

        // PROPERTY: metric == round(100·k/N, 2), 0 when empty
        prop_assert!((metric - expected).abs() < 1e-9, "metric {} expected {}", metric, expected);
    });
}

#[test]
fn prop_sifted_key_is_ordered_filter() {
    proptest!(|(records in arb_batch(), lateness_ms in prop::collection::vec(0u64..500, 0..60))| {
        let mut controller = SessionController::new(ControllerConfig::default());
        let t0 = Instant::now();
        start(&mut controller, &records, t0);

        // Poll at or after every deadline, sometimes late.
        let mut lateness = lateness_ms.into_iter();
        while let Some(deadline) = controller.next_deadline() {
            let late = Duration::from_millis(lateness.next().unwrap_or(0));
            controller.tick(deadline + late);
        }

        let run = controller.active_run().expect("run should be active");
        prop_assert_eq!(run.state(), RunState::Completed);

        let expected_sifted: Vec<Bit> =
            records.iter().filter(|r| r.bases_match()).map(ExchangeRecord::sender_bit).collect();
        let expected_interceptor: Vec<Bit> =
            records.iter().filter_map(ExchangeRecord::interceptor_bit).collect();

        // PROPERTY: sifted key is the basis-matched sender bits in index order
        prop_assert_eq!(run.sifted_key(), expected_sifted.as_slice());
        prop_assert!(run.sifted_key().len() <= records.len());
        prop_assert_eq!(run.interceptor_key(), expected_interceptor.as_slice());
        prop_assert_eq!(run.records(), records.as_slice());
    });
}

#[test]
fn prop_appends_strictly_ordered_under_cancellation() {
    proptest!(|(
        records in arb_batch(),
        steps in prop::collection::vec(0u64..400, 1..80),
        cancel_at in 0usize..80,
    )| {
        let mut controller = SessionController::new(ControllerConfig::default());
        let mut now = Instant::now();
        start(&mut controller, &records, now);
        let first = controller.active_generation();

        let mut seen = vec![0];
        let mut cancelled = false;
        for (i, step) in steps.into_iter().enumerate() {
            if i == cancel_at {
                controller.cancel_current_run();
                cancelled = true;
            }
            now += Duration::from_millis(step);
            let actions = controller.tick(now);

            // PROPERTY: nothing is appended after cancellation
            if cancelled {
                prop_assert!(appended(&actions).is_empty());
            }
            seen.extend(appended(&actions));
        }

        // PROPERTY: indices appear once each, in order, without gaps
        let expected: Vec<usize> = (0..seen.len()).collect();
        prop_assert_eq!(&seen, &expected);

        let run = controller.run(first).expect("run should exist");
        prop_assert_eq!(run.diagnostic_records(), &records[..seen.len()]);
        if run.state() == RunState::Cancelled {
            prop_assert!(run.sifted_key().is_empty());
            prop_assert!(run.records().is_empty());
        }
    });
}

#[test]
fn prop_gate_decision_table() {
    proptest!(|(key_len in 0usize..64, metric in 0.0f64..=100.0)| {
        let decision = SecurityGate::default().evaluate(key_len, metric);

        // PROPERTY: NoKey first, then strictly-greater-than-20 denies
        let expected = if key_len == 0 {
            GateDecision::Denied(DenyReason::NoKey)
        } else if metric > 20.0 {
            GateDecision::Denied(DenyReason::MetricExceeded)
        } else {
            GateDecision::Allowed
        };
        prop_assert_eq!(decision, expected);
    });
}
