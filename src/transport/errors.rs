use std::time::Duration;

use crate::transport::codec::is_disconnect;

/// Terminal failures of one FrameTransport connection
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Peer closed the stream on a record boundary
    #[error("connection closed by peer")]
    Closed,
    #[error("truncated record: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },
    #[error("record of {length} bytes exceeds limit of {max}")]
    Oversized { length: u64, max: u64 },
    #[error("connection reset: {0}")]
    Reset(std::io::Error),
    #[error("no handshake within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("device identifier is empty")]
    EmptyDeviceId,
    #[error("device identifier is not valid UTF-8")]
    InvalidDeviceId,
    #[error("IO error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if is_disconnect(&e) {
            TransportError::Reset(e)
        } else {
            TransportError::Io(e)
        }
    }
}

impl TransportError {
    /// True when the peer went away rather than sending something malformed
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::Closed | TransportError::Truncated { .. } | TransportError::Reset(_)
        )
    }
}
