//! Bits and measurement bases.

use std::fmt;

use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::ProtoError;

/// A single classical bit.
///
/// Serialized as the integers `0`/`1`, matching how keys travel on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
)]
#[repr(u8)]
pub enum Bit {
    /// Bit value 0.
    Zero = 0,
    /// Bit value 1.
    One = 1,
}

impl Bit {
    /// Numeric value of the bit.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Build a bit from the low bit of a random byte.
    pub fn from_lsb(byte: u8) -> Self {
        if byte & 1 == 0 { Self::Zero } else { Self::One }
    }
}

impl TryFrom<u8> for Bit {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            other => Err(ProtoError::InvalidBit { value: u64::from(other) }),
        }
    }
}

impl From<Bit> for u8 {
    fn from(bit: Bit) -> Self {
        bit.as_u8()
    }
}

impl fmt::Display for Bit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// One of the two conjugate measurement bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Basis {
    /// The `+` basis (0°).
    Rectilinear,
    /// The `×` basis (45°).
    Diagonal,
}

impl Basis {
    /// Short display symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Rectilinear => "+",
            Self::Diagonal => "×",
        }
    }

    /// Wire label used by the engine's table rows.
    pub fn label(self) -> &'static str {
        match self {
            Self::Rectilinear => "+ (0°)",
            Self::Diagonal => "× (45°)",
        }
    }

    /// Parse an engine basis label.
    ///
    /// The engine decorates the symbol with an angle, so only the leading
    /// symbol is significant. A plain `x` is accepted for the diagonal basis.
    pub fn parse_label(label: &str) -> Result<Self, ProtoError> {
        let trimmed = label.trim_start();
        if trimmed.starts_with('+') {
            Ok(Self::Rectilinear)
        } else if trimmed.starts_with('×') || trimmed.starts_with('x') || trimmed.starts_with('X')
        {
            Ok(Self::Diagonal)
        } else {
            Err(ProtoError::InvalidBasis { label: label.to_string() })
        }
    }

    /// Build a basis from the low bit of a random byte.
    pub fn from_lsb(byte: u8) -> Self {
        if byte & 1 == 0 { Self::Rectilinear } else { Self::Diagonal }
    }
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
