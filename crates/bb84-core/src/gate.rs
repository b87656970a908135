//! Security gate for cryptographic operations.
//!
//! A pure policy over (sifted key length, metric). A missing key is reported
//! ahead of a high metric so the user is told about the more fundamental
//! problem first.

use std::fmt;

/// Default interception threshold in percent.
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 20.0;

/// Why the gate refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// No sifted key is available.
    NoKey,
    /// The metric is above the threshold.
    MetricExceeded,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKey => f.write_str("no quantum key"),
            Self::MetricExceeded => f.write_str("QBER too high, an eavesdropper may be present"),
        }
    }
}

/// Gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateDecision {
    /// Crypto operations may proceed.
    Allowed,
    /// Crypto operations are refused.
    Denied(DenyReason),
}

impl GateDecision {
    /// Whether the decision allows crypto operations.
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Threshold policy over sifted key length and metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecurityGate {
    threshold_percent: f64,
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self { threshold_percent: DEFAULT_THRESHOLD_PERCENT }
    }
}

impl SecurityGate {
    /// Gate with a custom threshold in percent.
    pub fn with_threshold(threshold_percent: f64) -> Self {
        Self { threshold_percent }
    }

    /// Configured threshold in percent.
    pub fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    /// Decide whether crypto operations may proceed.
    ///
    /// `NoKey` is checked first, then `MetricExceeded` for a metric strictly
    /// above the threshold.
    pub fn evaluate(&self, sifted_key_len: usize, metric_percent: f64) -> GateDecision {
        if sifted_key_len == 0 {
            return GateDecision::Denied(DenyReason::NoKey);
        }
        if metric_percent > self.threshold_percent {
            return GateDecision::Denied(DenyReason::MetricExceeded);
        }
        GateDecision::Allowed
    }
}
