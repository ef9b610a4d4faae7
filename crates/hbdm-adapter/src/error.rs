//! Error taxonomy for the streaming connections
//!
//! `InvalidConfig`, `Connect` and the auth variants come back from
//! `connect`; `Closed` and write failures come back from subscribe. Anything
//! the receive loop hits is pushed once to the connection's error feed and
//! the loop stops.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Streaming connection errors
#[derive(Debug, Error)]
pub enum StreamError {
    /// Configuration rejected before dialing
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Dial or WebSocket upgrade failed
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tungstenite::Error,
    },

    /// Read or write failure on an established socket
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// Outbound frame not flushed within the write deadline
    #[error("write not completed within {0:?}")]
    WriteTimeout(Duration),

    /// No inbound frame within the read deadline
    #[error("no frame received within {0:?}")]
    IdleTimeout(Duration),

    /// Remote side closed the socket without being asked to
    #[error("connection closed by remote")]
    RemoteClosed,

    /// Inbound frame is not valid gzip
    #[error("frame decompression failed: {0}")]
    Codec(#[source] std::io::Error),

    /// Inbound frame is not the JSON shape its channel/method requires
    #[error("malformed {context} message: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Outbound frame could not be serialized
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// Exchange refused the credential frame
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// No auth response within the handshake deadline
    #[error("authentication not acknowledged within {0:?}")]
    AuthTimeout(Duration),

    /// Operation attempted on a closed connection
    #[error("connection closed")]
    Closed,
}

impl StreamError {
    pub(crate) fn decode(context: &'static str, source: serde_json::Error) -> Self {
        StreamError::Decode { context, source }
    }

    /// Whether the error came from a malformed message rather than the socket
    pub fn is_decode(&self) -> bool {
        matches!(self, StreamError::Decode { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::AuthRejected("invalid signature".to_string());
        assert_eq!(err.to_string(), "authentication rejected: invalid signature");

        let err = StreamError::IdleTimeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "no frame received within 30s");
    }

    #[test]
    fn test_decode_classification() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StreamError::decode("depth", source);
        assert!(err.is_decode());
        assert!(err.to_string().starts_with("malformed depth message"));
        assert!(!StreamError::RemoteClosed.is_decode());
    }
}
