//! Interception metric.
//!
//! The metric is the percentage of played records that the interceptor
//! measured, rounded to two decimals. It is maintained from two running
//! counters so every append is O(1), and it is not monotonic: interceptions
//! arrive in whatever order the engine produced them.

use bb84_proto::ExchangeRecord;

/// Round a percentage to two decimal places.
pub fn round_percent(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Incremental estimator over appended records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricEstimator {
    total: usize,
    intercepted: usize,
}

impl MetricEstimator {
    /// Empty estimator (metric 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one appended record.
    pub fn record(&mut self, record: &ExchangeRecord) {
        self.total += 1;
        if record.intercepted() {
            self.intercepted += 1;
        }
    }

    /// Number of records seen.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of intercepted records seen.
    pub fn intercepted(&self) -> usize {
        self.intercepted
    }

    /// Current metric in percent, rounded to two decimals. Zero when empty.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        round_percent(100.0 * self.intercepted as f64 / self.total as f64)
    }

    /// Recompute from scratch over a record slice.
    pub fn over(records: &[ExchangeRecord]) -> Self {
        let mut estimator = Self::new();
        for record in records {
            estimator.record(record);
        }
        estimator
    }
}

/// Percentage of basis-matched records whose receiver bit differs from the
/// sender bit, rounded to two decimals. Zero when no bases matched.
pub fn mismatch_percent(records: &[ExchangeRecord]) -> f64 {
    let (matched, differing) = records
        .iter()
        .filter(|r| r.bases_match())
        .fold((0usize, 0usize), |(matched, differing), r| {
            (matched + 1, differing + usize::from(r.sender_bit() != r.receiver_bit()))
        });

    if matched == 0 {
        return 0.0;
    }
    round_percent(100.0 * differing as f64 / matched as f64)
}
