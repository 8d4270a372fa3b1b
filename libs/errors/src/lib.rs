//! Unified error handling for VoltageEMS PLC drivers
//!
//! One error type shared by the engine, the transports and every driver, plus
//! the two closed code vocabularies callers see: [`ReturnCode`] for whole
//! operations and [`ResponseCode`] for individual items of a request.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use voltage_codec::CodecError;

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, PlcError>;

// ============================================================================
// ReturnCode - operation status vocabulary
// ============================================================================

/// Status code of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    Ok,
    /// No complete message yet; poll again
    Pending,
    ParseError,
    InternalError,
    AlreadyConnected,
    NotConnected,
    NoMemory,
    UnsupportedOperation,
    InvalidAddress,
    TransportError,
    Timeout,
    InvalidConnectionString,
    InvalidConfiguration,
    NoDriverAvailable,
    UnknownDriver,
    UnspecifiedTransport,
    NoTransportAvailable,
    UnknownTransport,
    RemoteError,
    ChecksumMismatch,
}

impl ReturnCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Pending => "PENDING",
            Self::ParseError => "PARSE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::AlreadyConnected => "ALREADY_CONNECTED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::NoMemory => "NO_MEMORY",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::InvalidConnectionString => "INVALID_CONNECTION_STRING",
            Self::InvalidConfiguration => "INVALID_CONFIGURATION",
            Self::NoDriverAvailable => "NO_DRIVER_AVAILABLE",
            Self::UnknownDriver => "UNKNOWN_DRIVER",
            Self::UnspecifiedTransport => "UNSPECIFIED_TRANSPORT",
            Self::NoTransportAvailable => "NO_TRANSPORT_AVAILABLE",
            Self::UnknownTransport => "UNKNOWN_TRANSPORT",
            Self::RemoteError => "REMOTE_ERROR",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
        }
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ResponseCode - per-item outcome
// ============================================================================

/// Outcome of a single item in a read or write response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Ok,
    NotFound,
    AccessDenied,
    InvalidAddress,
    InvalidDatatype,
    InternalError,
    RemoteBusy,
    RemoteError,
}

impl ResponseCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT_FOUND",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::InvalidDatatype => "INVALID_DATATYPE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::RemoteBusy => "REMOTE_BUSY",
            Self::RemoteError => "REMOTE_ERROR",
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PlcError - main error type
// ============================================================================

/// Main error type for connections, transports and drivers
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlcError {
    // ======================================
    // Codec Errors
    // ======================================
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Out of memory: {0}")]
    NoMemory(String),

    #[error("Checksum mismatch: {0}")]
    ChecksumMismatch(String),

    // ======================================
    // Connection State Errors
    // ======================================
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // ======================================
    // Communication Errors
    // ======================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Remote error: {0}")]
    Remote(String),

    // ======================================
    // Setup Errors
    // ======================================
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No driver available")]
    NoDriverAvailable,

    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    #[error("No transport specified and driver has no default")]
    UnspecifiedTransport,

    #[error("No transport available")]
    NoTransportAvailable,

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    // ======================================
    // Internal Errors
    // ======================================
    #[error("Internal error: {0}")]
    Internal(String),
}

// Helper methods for creating errors
impl PlcError {
    pub fn parse(msg: impl Into<String>) -> Self {
        PlcError::Parse(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        PlcError::Internal(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        PlcError::Transport(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        PlcError::Timeout(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        PlcError::UnsupportedOperation(msg.into())
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        PlcError::InvalidAddress(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        PlcError::Remote(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PlcError::Config(msg.into())
    }

    /// Status code for this error
    pub fn code(&self) -> ReturnCode {
        match self {
            Self::Parse(_) => ReturnCode::ParseError,
            Self::NoMemory(_) => ReturnCode::NoMemory,
            Self::ChecksumMismatch(_) => ReturnCode::ChecksumMismatch,
            Self::AlreadyConnected => ReturnCode::AlreadyConnected,
            Self::NotConnected => ReturnCode::NotConnected,
            Self::UnsupportedOperation(_) => ReturnCode::UnsupportedOperation,
            Self::InvalidAddress(_) => ReturnCode::InvalidAddress,
            Self::Transport(_) => ReturnCode::TransportError,
            Self::Timeout(_) => ReturnCode::Timeout,
            Self::Remote(_) => ReturnCode::RemoteError,
            Self::InvalidConnectionString(_) => ReturnCode::InvalidConnectionString,
            Self::Config(_) => ReturnCode::InvalidConfiguration,
            Self::NoDriverAvailable => ReturnCode::NoDriverAvailable,
            Self::UnknownDriver(_) => ReturnCode::UnknownDriver,
            Self::UnspecifiedTransport => ReturnCode::UnspecifiedTransport,
            Self::NoTransportAvailable => ReturnCode::NoTransportAvailable,
            Self::UnknownTransport(_) => ReturnCode::UnknownTransport,
            Self::Internal(_) => ReturnCode::InternalError,
        }
    }

    /// Errors that always end the current operation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Internal(_) | Self::NoMemory(_) | Self::Timeout(_)
        )
    }

    /// Errors a driver may retry by re-running the same state
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ChecksumMismatch(_))
    }

    /// Guard violations the caller can resolve (reconnect or ignore)
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::AlreadyConnected | Self::NotConnected)
    }

    /// Log level a failure with this error is reported at
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self {
            Self::Internal(_) | Self::NoMemory(_) => Level::ERROR,
            Self::AlreadyConnected | Self::NotConnected | Self::InvalidAddress(_) => Level::INFO,
            _ => Level::WARN,
        }
    }
}

impl From<CodecError> for PlcError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::BufferFull { .. } => PlcError::NoMemory(err.to_string()),
            CodecError::ChecksumMismatch { .. } => PlcError::ChecksumMismatch(err.to_string()),
            other => PlcError::Parse(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PlcError {
    fn from(err: std::io::Error) -> Self {
        PlcError::Transport(err.to_string())
    }
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PlcError::parse("x").code(), ReturnCode::ParseError);
        assert_eq!(PlcError::AlreadyConnected.code(), ReturnCode::AlreadyConnected);
        assert_eq!(
            PlcError::UnknownDriver("s7".into()).code(),
            ReturnCode::UnknownDriver
        );
        assert_eq!(PlcError::config("x").code(), ReturnCode::InvalidConfiguration);
    }

    #[test]
    fn test_codec_error_conversion() {
        let full: PlcError = CodecError::BufferFull {
            requested: 8,
            remaining: 0,
        }
        .into();
        assert_eq!(full.code(), ReturnCode::NoMemory);

        let mismatch: PlcError = CodecError::ConstMismatch {
            field: "protocolId",
            expected: 0,
            actual: 1,
        }
        .into();
        assert_eq!(mismatch.code(), ReturnCode::ParseError);
        assert!(mismatch.is_fatal());

        let crc: PlcError = CodecError::ChecksumMismatch {
            kind: "CRC-16",
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(crc.is_retryable());
    }

    #[test]
    fn test_classification() {
        assert!(PlcError::internal("x").is_fatal());
        assert!(PlcError::transport("reset").is_retryable());
        assert!(!PlcError::parse("x").is_retryable());
        assert!(PlcError::NotConnected.is_state_error());
        assert_eq!(PlcError::internal("x").log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_code_serialization() {
        let json = serde_json::to_string(&ReturnCode::InvalidConnectionString).unwrap();
        assert_eq!(json, "\"INVALID_CONNECTION_STRING\"");
        assert_eq!(ReturnCode::NoMemory.to_string(), "NO_MEMORY");
        assert_eq!(ResponseCode::InvalidDatatype.to_string(), "INVALID_DATATYPE");
        assert!(ResponseCode::Ok.is_ok());
    }
}
