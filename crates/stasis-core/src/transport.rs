//! Transport abstraction for message-oriented connections.
//!
//! Abstracts over transports that deliver whole frames (like WebSocket).
//! Production uses tokio-tungstenite, tests use an in-memory simulation or
//! turmoil's simulated TCP underneath the real WebSocket framing.

use std::time::Duration;

use async_trait::async_trait;
use stasis_proto::Frame;

use crate::TransportError;

/// Abstract transport that opens message-oriented connections.
///
/// A connection is handed out as two halves so the receive side can be
/// pumped by its own task while the owner keeps the send side:
/// - [`FrameSink`]: send frames, start the close handshake
/// - [`FrameStream`]: receive frames until the connection ends
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sending half of a connection.
    type Sink: FrameSink;

    /// Receiving half of a connection.
    type Stream: FrameStream;

    /// Connect to `url`.
    ///
    /// Resolves once the connection is open (handshake complete).
    async fn connect(&self, url: &str) -> Result<(Self::Sink, Self::Stream), TransportError>;

    /// Upper bound on a blocking close.
    ///
    /// After asking the sink to close, the owner waits for the stream to end;
    /// if the peer never completes the close handshake within this bound the
    /// connection is abandoned.
    fn close_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

/// Sending half of a connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Start the close handshake.
    ///
    /// The paired [`FrameStream`] ends once the handshake completes.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Receiving half of a connection.
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Next frame from the peer.
    ///
    /// Returns `None` once the connection has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}
