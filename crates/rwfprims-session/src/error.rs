use std::time::Duration;

use crate::channel::ChannelState;

/// Errors that can occur on an RWF channel.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] rwfprims_transport::TransportError),

    /// Codec or buffer pool error.
    #[error("codec error: {0}")]
    Codec(#[from] rwfprims_codec::CodecError),

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake message could not be encoded or parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer sent something the handshake cannot accept.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The connection was refused during the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The operation is not valid in the channel's current state.
    #[error("cannot {operation} while channel is {state}")]
    InvalidState {
        operation: &'static str,
        state: ChannelState,
    },

    /// Nothing was heard from the peer within the ping timeout.
    #[error("no traffic from peer within {0:?}")]
    PeerSilent(Duration),

    /// Channel initialization did not finish in time.
    #[error("channel initialization timed out after {0:?}")]
    InitTimeout(Duration),

    /// A message exceeds the negotiated maximum size.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A transport frame could not be parsed.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl SessionError {
    /// Whether this error leaves the channel unusable.
    ///
    /// Caller mistakes (wrong state, oversized message, exhausted pool) are
    /// reported without closing the channel.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::InvalidState { .. }
                | SessionError::MessageTooLarge { .. }
                | SessionError::Codec(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
