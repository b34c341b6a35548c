//! Meter link error types
//!
//! Every layer (codec, frame parser, transport, client) reports failures through
//! [`MeterError`]. Callers match on [`MeterError::kind`] instead of parsing messages.

use thiserror::Error;

/// Result type for meter-link operations
pub type Result<T> = std::result::Result<T, MeterError>;

/// Meter link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeterError {
    /// TCP connect did not complete within the connect timeout
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// Socket-level failure during connect, write or read
    #[error("Socket failure: {0}")]
    SocketFailure(String),

    /// Exchange timed out without a single response byte
    #[error("No response from unit {unit} (timeout {timeout_ms}ms)")]
    NoResponse { unit: u8, timeout_ms: u64 },

    /// Response shorter than the minimum frame
    #[error("Frame too short: {len} bytes")]
    FrameTooShort { len: usize },

    /// Trailing CRC does not match the computed one
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{received:04X}")]
    CrcMismatch { expected: u16, received: u16 },

    /// Function code is neither the requested one nor an exception
    #[error("Unexpected function code: expected 0x{expected:02X}, got 0x{received:02X}")]
    UnexpectedFunctionCode { expected: u8, received: u8 },

    /// Byte count field or payload length disagrees with the request
    #[error("Byte count mismatch: expected {expected}, got {received}")]
    ByteCountMismatch { expected: usize, received: usize },

    /// Device answered with a Modbus exception frame
    #[error("Device exception 0x{code:02X} ({description}) for FC{function:02X}")]
    DeviceException {
        function: u8,
        code: u8,
        description: &'static str,
    },

    /// Operation needs an open session
    #[error("Not connected")]
    NotConnected,

    /// No unit address answered the liveness probe
    #[error("No unit answered the probe (tried {tried:?})")]
    ProbeExhausted { tried: Vec<u8> },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Fieldless discriminant of [`MeterError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectTimeout,
    SocketFailure,
    NoResponse,
    FrameTooShort,
    CrcMismatch,
    UnexpectedFunctionCode,
    ByteCountMismatch,
    DeviceException,
    NotConnected,
    ProbeExhausted,
    Config,
}

impl From<std::io::Error> for MeterError {
    fn from(err: std::io::Error) -> Self {
        MeterError::SocketFailure(err.to_string())
    }
}

// Helper methods for creating errors
impl MeterError {
    pub fn socket(msg: impl Into<String>) -> Self {
        MeterError::SocketFailure(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        MeterError::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MeterError::ConnectTimeout(_) => ErrorKind::ConnectTimeout,
            MeterError::SocketFailure(_) => ErrorKind::SocketFailure,
            MeterError::NoResponse { .. } => ErrorKind::NoResponse,
            MeterError::FrameTooShort { .. } => ErrorKind::FrameTooShort,
            MeterError::CrcMismatch { .. } => ErrorKind::CrcMismatch,
            MeterError::UnexpectedFunctionCode { .. } => ErrorKind::UnexpectedFunctionCode,
            MeterError::ByteCountMismatch { .. } => ErrorKind::ByteCountMismatch,
            MeterError::DeviceException { .. } => ErrorKind::DeviceException,
            MeterError::NotConnected => ErrorKind::NotConnected,
            MeterError::ProbeExhausted { .. } => ErrorKind::ProbeExhausted,
            MeterError::Config(_) => ErrorKind::Config,
        }
    }

    /// Check if this error indicates the session is gone and must be rebuilt
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotConnected | ErrorKind::SocketFailure
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_reconnect() {
        assert!(MeterError::NotConnected.needs_reconnect());
        assert!(MeterError::socket("Connection reset by peer").needs_reconnect());
        assert!(!MeterError::NoResponse {
            unit: 1,
            timeout_ms: 3000
        }
        .needs_reconnect());
        assert!(!MeterError::CrcMismatch {
            expected: 0x1234,
            received: 0x4321
        }
        .needs_reconnect());
    }

    #[test]
    fn test_io_error_maps_to_socket_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Broken pipe");
        let err: MeterError = io.into();
        assert_eq!(err.kind(), ErrorKind::SocketFailure);
        assert!(err.to_string().contains("Broken pipe"));
    }
}
