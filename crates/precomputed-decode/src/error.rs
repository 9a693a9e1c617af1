//! Decoding errors.

use std::fmt;

/// Why a piece of mesh data could not be decoded.
///
/// Every variant names the structure being read, so that an error surfacing
/// from a deep fetch still says which object was bad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The data ended in the middle of a field.
    Truncated { context: &'static str },
    /// A fixed-size record had the wrong size.
    WrongLength {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A self-delimiting structure was followed by extra bytes.
    TrailingBytes { context: &'static str, count: usize },
    /// Fields were read but their values are inconsistent.
    Malformed {
        context: &'static str,
        detail: String,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { context } => write!(f, "{context} is truncated"),
            Self::WrongLength {
                context,
                expected,
                actual,
            } => write!(f, "{context} must be {expected} bytes, got {actual}"),
            Self::TrailingBytes { context, count } => {
                write!(f, "{context} has {count} unexpected trailing bytes")
            }
            Self::Malformed { context, detail } => write!(f, "malformed {context}: {detail}"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub type DecodeResult<T> = Result<T, DecodeError>;
