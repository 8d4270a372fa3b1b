//! Codec Error Types
//!
//! Errors raised while reading or writing bit-level message fields.

use thiserror::Error;

/// Result type for voltage-codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Read past the end of the buffer
    #[error("Out of data: requested {requested} bits, {remaining} remaining")]
    OutOfData { requested: usize, remaining: usize },

    /// Write past the capacity of a pre-sized buffer
    #[error("Buffer full: requested {requested} bits, {remaining} remaining")]
    BufferFull { requested: usize, remaining: usize },

    /// Bit count outside the supported range for the operation
    #[error("Invalid bit count: {0}")]
    InvalidBitCount(usize),

    /// Byte-granular operation attempted at a non byte-aligned cursor
    #[error("Misaligned access at bit position {position}")]
    Misaligned { position: usize },

    /// Const field did not carry its expected literal
    #[error("Const field '{field}' mismatch: expected {expected:#x}, got {actual:#x}")]
    ConstMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    /// Wire value with no matching enum variant
    #[error("Invalid value {value:#x} for enum {name}")]
    InvalidEnumValue { name: &'static str, value: u64 },

    /// Text could not be encoded or decoded
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Value does not fit the field width
    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    /// Checksum verification failed
    #[error("{kind} checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        kind: &'static str,
        expected: u64,
        actual: u64,
    },

    /// Declared length disagrees with the data present
    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Structurally invalid message
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

// Helper methods for creating errors
impl CodecError {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        CodecError::InvalidData(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        CodecError::ValueOutOfRange(msg.into())
    }

    pub fn invalid_encoding(msg: impl Into<String>) -> Self {
        CodecError::InvalidEncoding(msg.into())
    }

    /// Whether this error came from a full write buffer rather than bad input
    pub fn is_capacity_error(&self) -> bool {
        matches!(self, CodecError::BufferFull { .. })
    }
}
