//! Error types for the Actisense SDK.
//!
//! Every fallible operation in the crate surfaces exactly one [`SdkError`].
//! Callbacks receive the flat [`ErrorKind`] tag plus a message, so embedders
//! can route on the kind without matching the full error enum.

use thiserror::Error;

/// Flat error tag delivered through session callbacks.
///
/// The set is fixed; each kind maps to one human-readable message via
/// [`ErrorKind::message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No error.
    Ok,
    /// Failed to open transport (port busy, not found).
    TransportOpenFailed,
    /// I/O error during read/write.
    TransportIo,
    /// Transport was closed unexpectedly.
    TransportClosed,
    /// Operation timed out.
    Timeout,
    /// Protocol version or type mismatch.
    ProtocolMismatch,
    /// Received frame failed validation.
    MalformedFrame,
    /// Frame checksum verification failed.
    ChecksumError,
    /// Operation not supported by this device/protocol.
    UnsupportedOperation,
    /// Operation was canceled.
    Canceled,
    /// Write queue full, backpressure applied.
    RateLimited,
    /// Invalid argument passed to an API.
    InvalidArgument,
    /// Session not connected.
    NotConnected,
    /// Session already connected.
    AlreadyConnected,
    /// Internal SDK error (bug).
    Internal,
}

impl ErrorKind {
    /// Fixed human-readable message for this kind.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::Ok => "no error",
            ErrorKind::TransportOpenFailed => "failed to open transport",
            ErrorKind::TransportIo => "transport I/O error",
            ErrorKind::TransportClosed => "transport closed",
            ErrorKind::Timeout => "operation timed out",
            ErrorKind::ProtocolMismatch => "protocol mismatch",
            ErrorKind::MalformedFrame => "received frame failed validation",
            ErrorKind::ChecksumError => "frame checksum verification failed",
            ErrorKind::UnsupportedOperation => "operation not supported",
            ErrorKind::Canceled => "operation canceled",
            ErrorKind::RateLimited => "write queue full, rate limited",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotConnected => "session not connected",
            ErrorKind::AlreadyConnected => "session already connected",
            ErrorKind::Internal => "internal SDK error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Main error type for all SDK operations.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Failed to open the transport (port busy, not found).
    #[error("failed to open transport: {0}")]
    TransportOpenFailed(String),

    /// I/O error during read/write.
    #[error("transport I/O error: {0}")]
    TransportIo(String),

    /// Transport was closed while operations were outstanding.
    #[error("transport closed")]
    TransportClosed,

    /// Request or operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Payload did not belong to the expected protocol layer.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Frame failed structural validation (framing, length, checksum).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Checksum verification failed.
    #[error("frame checksum verification failed")]
    ChecksumError,

    /// Device or protocol rejected the operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Operation canceled by shutdown or user.
    #[error("operation canceled")]
    Canceled,

    /// Write queue full; backpressure applied.
    #[error("write queue full, rate limited")]
    RateLimited,

    /// Invalid argument passed to an API.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Session is not connected.
    #[error("session not connected")]
    NotConnected,

    /// Session is already connected.
    #[error("session already connected")]
    AlreadyConnected,

    /// Internal SDK error (bug).
    #[error("internal SDK error: {0}")]
    Internal(String),
}

impl SdkError {
    /// The flat [`ErrorKind`] tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SdkError::TransportOpenFailed(_) => ErrorKind::TransportOpenFailed,
            SdkError::TransportIo(_) => ErrorKind::TransportIo,
            SdkError::TransportClosed => ErrorKind::TransportClosed,
            SdkError::Timeout => ErrorKind::Timeout,
            SdkError::ProtocolMismatch(_) => ErrorKind::ProtocolMismatch,
            SdkError::MalformedFrame(_) => ErrorKind::MalformedFrame,
            SdkError::ChecksumError => ErrorKind::ChecksumError,
            SdkError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            SdkError::Canceled => ErrorKind::Canceled,
            SdkError::RateLimited => ErrorKind::RateLimited,
            SdkError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SdkError::NotConnected => ErrorKind::NotConnected,
            SdkError::AlreadyConnected => ErrorKind::AlreadyConnected,
            SdkError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for SdkError {
    fn from(e: std::io::Error) -> Self {
        SdkError::TransportIo(e.to_string())
    }
}

/// Result type alias using [`SdkError`].
pub type Result<T> = std::result::Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping_is_stable() {
        assert_eq!(SdkError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            SdkError::MalformedFrame("x".into()).kind(),
            ErrorKind::MalformedFrame
        );
        assert_eq!(SdkError::NotConnected.kind(), ErrorKind::NotConnected);
        assert_eq!(
            SdkError::TransportOpenFailed("busy".into()).kind(),
            ErrorKind::TransportOpenFailed
        );
    }

    #[test]
    fn test_every_kind_has_a_message() {
        let kinds = [
            ErrorKind::Ok,
            ErrorKind::TransportOpenFailed,
            ErrorKind::TransportIo,
            ErrorKind::TransportClosed,
            ErrorKind::Timeout,
            ErrorKind::ProtocolMismatch,
            ErrorKind::MalformedFrame,
            ErrorKind::ChecksumError,
            ErrorKind::UnsupportedOperation,
            ErrorKind::Canceled,
            ErrorKind::RateLimited,
            ErrorKind::InvalidArgument,
            ErrorKind::NotConnected,
            ErrorKind::AlreadyConnected,
            ErrorKind::Internal,
        ];
        for kind in kinds {
            assert!(!kind.message().is_empty());
        }
    }

    #[test]
    fn test_io_error_maps_to_transport_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: SdkError = io.into();
        assert_eq!(err.kind(), ErrorKind::TransportIo);
        assert!(err.to_string().contains("pipe"));
    }
}
