//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or payload parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed header: expected 12 bytes, got {0}")]
    MalformedHeader(usize),

    #[error("invalid frame length: {0} (minimum is 12)")]
    InvalidLength(u32),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("malformed {format} payload: {reason}")]
    MalformedPayload {
        format: &'static str,
        reason: String,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(format: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedPayload {
            format,
            reason: reason.into(),
        }
    }
}
