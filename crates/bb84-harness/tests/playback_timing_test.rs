//! Playback timing under virtual time.
//!
//! These tests run the production runtime against the in-process engine
//! inside Turmoil, so a 45 second playback completes instantly and every
//! timestamp is exact to the simulation tick.
//!
//! Timing contract per record:
//! - The record is shown for `pace * 30`
//! - An intercepted record raises the signal on display and clears it at
//!   half the slot
//! - The next record is shown only once the full slot has elapsed

#![allow(clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bb84_core::{Environment, RunSummary, SessionAction, SessionConfig};
use bb84_harness::{ScriptedCipher, SimEngine, SimEnv, SimRuntime};
use bb84_runtime::{RuntimeConfig, RuntimeNotice};

/// Slack for the simulation tick between a deadline and the observed time.
const TICK_SLACK: Duration = Duration::from_millis(5);

fn sim() -> turmoil::Sim<'static> {
    turmoil::Builder::new().simulation_duration(Duration::from_secs(600)).build()
}

fn config(particle_count: u32, interception_probability: f64, pace: Duration) -> SessionConfig {
    SessionConfig { particle_count, interception_probability, pace, hardware_mode: false }
}

fn is_completed(notice: &RuntimeNotice) -> bool {
    matches!(notice, RuntimeNotice::Session(SessionAction::RunCompleted { .. }))
}

#[test]
fn records_are_shown_one_slot_apart() {
    let mut sim = sim();

    sim.client("runtime", async {
        let env = SimEnv::with_seed(11);
        let mut rt = SimRuntime::spawn_with(
            env.clone(),
            SimEngine::new(env.clone()).with_latency(Duration::from_millis(50)),
            ScriptedCipher::new(env.clone()),
            RuntimeConfig::default(),
        );

        let started = env.now();
        let generation =
            rt.handle.start_run(config(10, 0.0, Duration::from_millis(150))).await?;
        rt.observer.wait_for(Duration::from_secs(120), is_completed).await.expect("run completes");

        let appends = rt.observer.appends(generation);
        let indices: Vec<usize> = appends.iter().map(|(_, index)| *index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());

        let first = appends[0].0 - started;
        assert!(first >= Duration::from_millis(50), "shown before the batch arrived: {first:?}");

        let slot = Duration::from_millis(4500);
        for pair in appends.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(gap >= slot && gap <= slot + TICK_SLACK, "slot gap {gap:?}");
        }

        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn interception_signal_covers_first_half_of_slot() {
    let mut sim = sim();

    sim.client("runtime", async {
        let mut rt = SimRuntime::spawn(12);

        let generation = rt.handle.start_run(config(10, 1.0, Duration::from_millis(10))).await?;
        rt.observer.wait_for(Duration::from_secs(60), is_completed).await.expect("run completes");

        let signals = rt.observer.signals(generation);
        assert_eq!(signals.len(), 20, "one raise and one clear per record");

        let half = Duration::from_millis(150);
        for pair in signals.chunks(2) {
            let [(raised_at, raised), (cleared_at, cleared)] = [pair[0], pair[1]];
            assert!(raised && !cleared);
            let shown = cleared_at - raised_at;
            assert!(shown >= half && shown <= half + TICK_SLACK, "signal shown for {shown:?}");
        }

        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn clean_records_never_raise_the_signal() {
    let mut sim = sim();

    sim.client("runtime", async {
        let mut rt = SimRuntime::spawn(13);

        let generation = rt.handle.start_run(config(25, 0.0, Duration::from_millis(2))).await?;
        rt.observer.wait_for(Duration::from_secs(60), is_completed).await.expect("run completes");

        assert!(rt.observer.signals(generation).is_empty());
        assert_eq!(rt.observer.appends(generation).len(), 25);

        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn same_seed_replays_the_same_run() {
    let run = |seed: u64| -> RunSummary {
        let summary = Arc::new(Mutex::new(None));
        let mut sim = sim();

        let out = Arc::clone(&summary);
        sim.client("runtime", async move {
            let mut rt = SimRuntime::spawn(seed);

            rt.handle.start_run(config(30, 0.4, Duration::from_millis(1))).await?;
            let done = rt.observer.wait_for(Duration::from_secs(60), is_completed).await;
            if let Some(RuntimeNotice::Session(SessionAction::RunCompleted { summary, .. })) = done
            {
                *out.lock().expect("summary lock") = Some(summary);
            }

            Ok(())
        });

        sim.run().expect("simulation failed");
        let summary = summary.lock().expect("summary lock").take();
        summary.expect("run completed")
    };

    let first = run(42);
    assert_eq!(first, run(42));
    assert_eq!(first.record_count, 30);
    assert!(first.metric > 0.0, "40% interception over 30 records");
}
