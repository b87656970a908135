//! Plain-language explanations of individual exchange records.

use std::fmt;

use bb84_proto::{Bit, ExchangeRecord};

/// One observation about a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insight {
    /// Bases matched and the receiver got the sender's bit.
    BitsAgree,
    /// Bases matched, bits differ, and the qubit was intercepted.
    BitsDifferUnderInterception,
    /// Bases matched, bits differ, and nobody intercepted.
    BitsDifferChannelNoise,
    /// Bases differed, so the receiver's bit is uncorrelated.
    BasesDiffer,
    /// The interceptor measured this qubit.
    Intercepted {
        /// What it measured.
        bit: Bit,
    },
    /// The qubit reached the receiver untouched.
    NotIntercepted,
    /// Survives sifting.
    KeptInSifting,
    /// Dropped during sifting.
    DiscardedInSifting,
}

impl fmt::Display for Insight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BitsAgree => {
                f.write_str("bases matched and the receiver measured the sender's bit")
            },
            Self::BitsDifferUnderInterception => f.write_str(
                "bases matched but the bits differ; the interceptor may have disturbed the qubit",
            ),
            Self::BitsDifferChannelNoise => f.write_str(
                "bases matched but the bits differ; likely channel noise or measurement error",
            ),
            Self::BasesDiffer => f.write_str(
                "bases differed, so the receiver's result is uncorrelated with the sender's bit",
            ),
            Self::Intercepted { bit } => write!(f, "intercepted and measured as {bit}"),
            Self::NotIntercepted => f.write_str("not intercepted"),
            Self::KeptInSifting => {
                f.write_str("kept during sifting: both sides used the same basis")
            },
            Self::DiscardedInSifting => f.write_str("discarded during sifting: the bases differed"),
        }
    }
}

/// Explain a record: bit agreement, interception, then sifting outcome.
pub fn insights(record: &ExchangeRecord) -> Vec<Insight> {
    let agreement = match (record.bases_match(), record.sender_bit() == record.receiver_bit()) {
        (false, _) => Insight::BasesDiffer,
        (true, true) => Insight::BitsAgree,
        (true, false) if record.intercepted() => Insight::BitsDifferUnderInterception,
        (true, false) => Insight::BitsDifferChannelNoise,
    };

    let interception = match record.interceptor_bit() {
        Some(bit) => Insight::Intercepted { bit },
        None => Insight::NotIntercepted,
    };

    let sifting =
        if record.bases_match() { Insight::KeptInSifting } else { Insight::DiscardedInSifting };

    vec![agreement, interception, sifting]
}

#[cfg(test)]
mod tests {
    use bb84_proto::Basis;

    use super::*;

    fn render(record: &ExchangeRecord) -> String {
        insights(record).iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn clean_matching_record() {
        let record =
            ExchangeRecord::new(Bit::One, Basis::Rectilinear, Basis::Rectilinear, Bit::One, None);
        insta::assert_snapshot!(render(&record), @r"
        bases matched and the receiver measured the sender's bit
        not intercepted
        kept during sifting: both sides used the same basis
        ");
    }

    #[test]
    fn disturbed_record() {
        let record = ExchangeRecord::new(
            Bit::Zero,
            Basis::Diagonal,
            Basis::Diagonal,
            Bit::One,
            Some(Bit::One),
        );
        insta::assert_snapshot!(render(&record), @r"
        bases matched but the bits differ; the interceptor may have disturbed the qubit
        intercepted and measured as 1
        kept during sifting: both sides used the same basis
        ");
    }

    #[test]
    fn noisy_and_mismatched_records() {
        let noisy =
            ExchangeRecord::new(Bit::Zero, Basis::Diagonal, Basis::Diagonal, Bit::One, None);
        assert_eq!(insights(&noisy)[0], Insight::BitsDifferChannelNoise);

        let mismatched =
            ExchangeRecord::new(Bit::Zero, Basis::Diagonal, Basis::Rectilinear, Bit::Zero, None);
        assert_eq!(
            insights(&mismatched),
            vec![Insight::BasesDiffer, Insight::NotIntercepted, Insight::DiscardedInSifting]
        );
    }
}
