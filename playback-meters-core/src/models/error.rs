use thiserror::Error;

/// Errors raised by device enumeration, capture and configuration.
///
/// Start-up failures surface synchronously from `start`/`initialize`; nothing
/// in the capture thread tears the process down.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeterError {
    #[error("device enumeration service unavailable")]
    EnumerationUnavailable,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("format negotiation failed: {0}")]
    FormatNegotiation(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("buffer fetch failed: {0}")]
    BufferFetch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("capture thread error: {0}")]
    Thread(String),

    #[error("platform error: {0}")]
    Platform(String),
}
