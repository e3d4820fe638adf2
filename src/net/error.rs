//! Connection error taxonomy.

use thiserror::Error;

use crate::protocol::Packet;

/// Errors surfaced by connection operations.
///
/// Only `Backpressure` and `Closed` are ever returned to application code;
/// the others end the connection and show up in logs and the close reason.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The outbound queue is at capacity. The rejected packet is handed back.
    #[error("outbound queue is full")]
    Backpressure(Packet),

    /// The connection has been torn down.
    #[error("connection is closed")]
    Closed,

    /// A packet's declared size disagrees with its payload.
    #[error("declared packet size {declared} does not match payload length {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    /// Socket read or write failure.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Recover the packet a `Backpressure` error carries.
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            ConnectionError::Backpressure(packet) => Some(packet),
            _ => None,
        }
    }
}

/// Why a connection was torn down. Recorded by whichever trigger wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `Connection::close` was called by application code.
    Local,
    /// The connect hook refused the connection.
    Rejected,
    /// The reader returned an error (including end of stream).
    ReadFailed,
    /// Writing to the socket failed.
    WriteFailed,
    /// An outbound packet's declared size did not match its payload.
    SizeMismatch,
    /// A packet with the close flag was delivered.
    CloseAfterSend,
    /// A queue between pumps was closed underneath a pump.
    QueueClosed,
    /// The server stopped.
    ServerShutdown,
    /// A pump panicked, most likely inside a hook.
    PumpPanicked,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::Local => "local",
            CloseReason::Rejected => "rejected",
            CloseReason::ReadFailed => "read_failed",
            CloseReason::WriteFailed => "write_failed",
            CloseReason::SizeMismatch => "size_mismatch",
            CloseReason::CloseAfterSend => "close_after_send",
            CloseReason::QueueClosed => "queue_closed",
            CloseReason::ServerShutdown => "server_shutdown",
            CloseReason::PumpPanicked => "pump_panicked",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpressure_returns_packet() {
        let err = ConnectionError::Backpressure(Packet::new("retry me"));
        assert_eq!(err.into_packet().unwrap().payload(), b"retry me");
        assert!(ConnectionError::Closed.into_packet().is_none());
    }

    #[test]
    fn size_mismatch_message_names_both_sizes() {
        let err = ConnectionError::SizeMismatch { declared: 8, actual: 5 };
        assert_eq!(
            err.to_string(),
            "declared packet size 8 does not match payload length 5"
        );
    }
}
