//! Oracle checks over the action streams.
//!
//! The oracle sees every action the controller and pipeline emit, together
//! with the generation that was active at emission, and records a violation
//! whenever an ordering or staleness guarantee is broken. It keeps its own
//! copy of every appended record so derived values can be recomputed
//! independently.

use std::collections::HashMap;

use bb84_core::{
    Generation, MessageAction, MessageId, MessageStage, RunState, SessionAction, round_percent,
};
use bb84_proto::{Bit, ExchangeRecord};

/// What the oracle has seen for one generation.
#[derive(Debug, Default)]
struct RunTrace {
    records: Vec<ExchangeRecord>,
    signal_active: bool,
    completed: bool,
    retired: bool,
}

/// Invariant checker fed by [`SimWorld`](super::SimWorld).
#[derive(Debug, Default)]
pub struct Oracle {
    runs: HashMap<Generation, RunTrace>,
    bound: HashMap<MessageId, Generation>,
    stages: HashMap<MessageId, MessageStage>,
    violations: Vec<String>,
}

impl Oracle {
    /// Oracle with nothing observed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Violations found so far, in detection order.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Record a violation found outside the action streams.
    pub fn report(&mut self, violation: impl Into<String>) {
        self.violations.push(violation.into());
    }

    /// Records the oracle saw appended for `generation`.
    pub fn records(&self, generation: Generation) -> &[ExchangeRecord] {
        self.runs.get(&generation).map_or(&[], |run| &run.records)
    }

    /// Check one session action emitted while `active` was current.
    pub fn observe_session(&mut self, action: &SessionAction, active: Generation) {
        let Self { runs, violations, .. } = self;
        let mut report = |violation: String| violations.push(violation);

        match action {
            SessionAction::RequestBatch { generation, .. } => {
                if *generation != active {
                    report(format!("batch requested for {generation} while {active} active"));
                }
            },
            SessionAction::RecordAppended { generation, index, record, metric } => {
                if *generation != active {
                    report(format!("record appended to {generation} while {active} active"));
                }
                let run = runs.entry(*generation).or_default();
                if run.retired || run.completed {
                    report(format!("record appended to settled run {generation}"));
                }
                if *index != run.records.len() {
                    report(format!(
                        "record {index} appended to {generation} after {} records",
                        run.records.len()
                    ));
                }
                run.records.push(*record);
                let expected = expected_metric(&run.records);
                if (expected - metric).abs() > 1e-9 {
                    report(format!("metric {metric} for {generation}, expected {expected}"));
                }
            },
            SessionAction::InterceptionSignal { generation, active: on } => {
                let run = runs.entry(*generation).or_default();
                if *on && (run.retired || run.completed) {
                    report(format!("interception signal raised for settled run {generation}"));
                }
                run.signal_active = *on;
            },
            SessionAction::StateChanged { generation, state } => {
                let run = runs.entry(*generation).or_default();
                if *state == RunState::Cancelled {
                    run.retired = true;
                    if run.signal_active {
                        report(format!("run {generation} cancelled with signal active"));
                    }
                }
            },
            SessionAction::RunCompleted { generation, summary } => {
                let run = runs.entry(*generation).or_default();
                if run.completed {
                    report(format!("run {generation} completed twice"));
                }
                run.completed = true;
                if run.signal_active {
                    report(format!("run {generation} completed with signal active"));
                }
                let sifted: Vec<Bit> = run
                    .records
                    .iter()
                    .filter(|r| r.bases_match())
                    .map(ExchangeRecord::sender_bit)
                    .collect();
                let intercepted: Vec<Bit> =
                    run.records.iter().filter_map(ExchangeRecord::interceptor_bit).collect();
                if summary.record_count != run.records.len() {
                    report(format!("run {generation} summary counts {}", summary.record_count));
                }
                if summary.sifted_key != sifted {
                    report(format!("run {generation} sifted key is not the matched filter"));
                }
                if summary.interceptor_key != intercepted {
                    report(format!("run {generation} interceptor key mismatch"));
                }
            },
            SessionAction::RunFailed { generation, .. } => {
                let run = runs.entry(*generation).or_default();
                if !run.records.is_empty() {
                    report(format!("run {generation} failed after playback began"));
                }
            },
            SessionAction::Discarded { current, .. } => {
                if *current != active {
                    report(format!("discard reports {current} while {active} active"));
                }
            },
        }
    }

    /// Check one pipeline action emitted while `active` was current.
    pub fn observe_message(&mut self, action: &MessageAction, active: Generation) {
        match action {
            MessageAction::Encrypt { id, generation, key, .. } => {
                if self.bound.insert(*id, *generation).is_some() {
                    self.report(format!("message {id} encrypted twice"));
                }
                self.stages.insert(*id, MessageStage::Pending);
                if *generation != active {
                    self.report(format!("message {id} bound to inactive {generation}"));
                }
                if key.is_empty() {
                    self.report(format!("message {id} sent with an empty key"));
                }
            },
            MessageAction::Decrypt { id, generation, .. } => {
                if *generation != active {
                    self.report(format!("decrypt for {id} issued under stale {generation}"));
                }
            },
            MessageAction::StageChanged { id, stage } => {
                let bound = self.bound.get(id).copied();
                if bound != Some(active) {
                    self.report(format!("message {id} advanced after its run was superseded"));
                }
                let previous = self.stages.insert(*id, *stage);
                if !valid_transition(previous, *stage) {
                    self.report(format!("message {id} moved {previous:?} -> {stage:?}"));
                }
            },
            MessageAction::Discarded { current, .. } => {
                if *current != active {
                    self.report(format!(
                        "message discard reports {current} while {active} active"
                    ));
                }
            },
        }
    }
}

fn valid_transition(from: Option<MessageStage>, to: MessageStage) -> bool {
    matches!(
        (from, to),
        (Some(MessageStage::Pending), MessageStage::Encrypted | MessageStage::Failed)
            | (Some(MessageStage::Encrypted), MessageStage::Delivered | MessageStage::Failed)
    )
}

fn expected_metric(records: &[ExchangeRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let intercepted = records.iter().filter(|r| r.intercepted()).count();
    round_percent(100.0 * intercepted as f64 / records.len() as f64)
}
