//! Timed replay of an exchange batch.
//!
//! The sequencer replays an already-complete batch one record at a time.
//! It is Sans-IO: the driver calls [`PlaybackSequencer::poll`] with the
//! current time whenever [`PlaybackSequencer::next_deadline`] passes, and the
//! sequencer returns whatever events became due.
//!
//! # Timing
//!
//! Each record occupies one slot of `pace × PACE_MULTIPLIER`:
//!
//! ```text
//!   shown_at            shown_at + slot/2          shown_at + slot
//!      │ RecordDisplay         │                          │ next RecordDisplay
//!      │ Signal(on)*           │ Signal(off)*             │ (or SequenceComplete)
//!      ▼                       ▼                          ▼
//!      ├───────────────────────┼──────────────────────────┤
//!                                   * only for intercepted records
//! ```
//!
//! The next slot starts at the poll that observed the previous slot's end,
//! so a late poll shifts the remaining schedule instead of compressing it.
//!
//! # Invariants
//!
//! - Records are displayed strictly in index order, at most once each.
//! - No record is displayed after `cancel()`.
//! - A sequencer that has finished or been cancelled never emits again.

use std::time::{Duration, Instant};

use bb84_proto::ExchangeRecord;

/// Display slot length as a multiple of the configured pace.
pub const PACE_MULTIPLIER: u32 = 30;

/// Events produced during playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A record's display slot began.
    RecordDisplay {
        /// Position in the batch.
        index: usize,
        /// The record being displayed.
        record: ExchangeRecord,
    },

    /// The interception indicator changed.
    InterceptionSignal {
        /// Record the signal belongs to.
        index: usize,
        /// Whether interception is being shown.
        active: bool,
    },

    /// Every record has been displayed for its full slot.
    SequenceComplete,

    /// Playback was cancelled before completion.
    SequenceCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Showing { index: usize, shown_at: Instant, signal_active: bool },
    Finished,
    Cancelled,
}

/// Replays an ordered batch under a fixed pace.
#[derive(Debug, Clone)]
pub struct PlaybackSequencer {
    records: Vec<ExchangeRecord>,
    slot: Duration,
    phase: Phase,
}

impl PlaybackSequencer {
    /// Create a sequencer for `records` at `pace` per display unit.
    pub fn new(records: Vec<ExchangeRecord>, pace: Duration) -> Self {
        Self { records, slot: pace.saturating_mul(PACE_MULTIPLIER), phase: Phase::Ready }
    }

    /// Full display duration of one record.
    pub fn slot(&self) -> Duration {
        self.slot
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `start` has not been called yet.
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Whether playback completed or was cancelled.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished | Phase::Cancelled)
    }

    /// Begin playback at `now`.
    ///
    /// Emits the first record (or `SequenceComplete` for an empty batch).
    /// Calling it again after the first time does nothing.
    pub fn start(&mut self, now: Instant) -> Vec<PlaybackEvent> {
        if self.phase != Phase::Ready {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.display(0, now, &mut events);
        events.extend(self.poll(now));
        events
    }

    /// When the next event becomes due, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Showing { shown_at, signal_active: true, .. } => Some(shown_at + self.slot / 2),
            Phase::Showing { shown_at, signal_active: false, .. } => Some(shown_at + self.slot),
            Phase::Ready | Phase::Finished | Phase::Cancelled => None,
        }
    }

    /// Emit every event due at `now`, in order.
    pub fn poll(&mut self, now: Instant) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();

        while let Phase::Showing { index, shown_at, signal_active } = self.phase {
            if signal_active {
                if now < shown_at + self.slot / 2 {
                    break;
                }
                self.phase = Phase::Showing { index, shown_at, signal_active: false };
                events.push(PlaybackEvent::InterceptionSignal { index, active: false });
                continue;
            }

            if now < shown_at + self.slot {
                break;
            }
            self.display(index + 1, now, &mut events);
        }

        events
    }

    /// Stop playback. Pending signal clears and advances are voided.
    ///
    /// An asserted interception signal is retracted immediately. Returns no
    /// events when playback already finished.
    pub fn cancel(&mut self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        match self.phase {
            Phase::Finished | Phase::Cancelled => return events,
            Phase::Showing { index, signal_active: true, .. } => {
                events.push(PlaybackEvent::InterceptionSignal { index, active: false });
            },
            Phase::Showing { .. } | Phase::Ready => {},
        }
        self.phase = Phase::Cancelled;
        events.push(PlaybackEvent::SequenceCancelled);
        events
    }

    fn display(&mut self, index: usize, now: Instant, events: &mut Vec<PlaybackEvent>) {
        let Some(record) = self.records.get(index).copied() else {
            self.phase = Phase::Finished;
            events.push(PlaybackEvent::SequenceComplete);
            return;
        };

        let signal_active = record.intercepted();
        self.phase = Phase::Showing { index, shown_at: now, signal_active };
        events.push(PlaybackEvent::RecordDisplay { index, record });
        if signal_active {
            events.push(PlaybackEvent::InterceptionSignal { index, active: true });
        }
    }
}
