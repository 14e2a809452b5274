//! Transport-level frames.
//!
//! The protocol only ever speaks in [`Frame::Text`]. The other variants exist
//! because the underlying message transport delivers them and the connection
//! layer has to decide what to do with each (keepalive bookkeeping, ignoring
//! binary payloads, observing the peer's close).

use std::fmt;

/// Close code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code (1000 = normal closure)
    pub code: u16,
    /// Free-form reason supplied by the closing side
    pub reason: String,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.reason)
        }
    }
}

/// A single message-oriented frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame; carries every protocol message
    Text(String),
    /// Binary frame; unsupported by the protocol
    Binary(Vec<u8>),
    /// Keepalive probe
    Ping(Vec<u8>),
    /// Keepalive answer
    Pong(Vec<u8>),
    /// Close handshake frame
    Close(Option<CloseReason>),
}

impl Frame {
    /// Build a text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Text payload, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Short frame kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Close(_) => "close",
        }
    }
}
