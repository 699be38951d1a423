//! Crate-wide error type.

use std::io;
use thiserror::Error;

/// Everything that can go wrong while handshaking, framing, or driving a
/// connection.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("peer closed the connection mid-frame")]
    PeerClosed,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("protocol violation: {reason} (close status {status})")]
    ProtocolViolation { reason: String, status: u16 },

    #[error("message exceeds the configured maximum size")]
    MessageTooLarge,

    #[error("send failed: {0}")]
    SendFailed(io::Error),

    #[error("no connection registered for this handle")]
    UnknownConnection,
}

impl WsError {
    /// Builds a `ProtocolViolation` with the standard close status (1002).
    pub fn violation(reason: impl Into<String>) -> WsError {
        WsError::ProtocolViolation {
            reason: reason.into(),
            status: 1002,
        }
    }

    /// The close status this error implies, if it implies one at all.
    ///
    /// `PeerClosed` and plain I/O errors don't get an outbound close frame —
    /// the stream is already gone or unusable.
    pub fn close_status(&self) -> Option<u16> {
        match self {
            WsError::ProtocolViolation { status, .. } => Some(*status),
            WsError::MessageTooLarge => Some(1009),
            _ => None,
        }
    }
}
