//! In-memory transport with a scripted remote controller.
//!
//! [`SimTransport`] hands out connections whose far end is a [`SimPeer`]
//! delivered through a [`SimServer`]. Tests play the controller: accept the
//! agent's connection, read its frames, send commands and close or drop the
//! connection to inject failures.
//!
//! Close semantics follow WebSocket: closing either side delivers a close
//! frame to the other and ends both directions, while dropping a peer without
//! closing looks like a reset.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use stasis_core::{FrameSink, FrameStream, Transport, TransportError};
use stasis_proto::{CloseReason, Frame, Response};
use tokio::sync::{mpsc, watch};

#[derive(Debug)]
struct Shared {
    online: AtomicBool,
    attempts: AtomicUsize,
    failing_sends: Arc<AtomicUsize>,
    accept_tx: mpsc::UnboundedSender<SimPeer>,
}

/// In-memory transport. Clones share the same server and counters.
#[derive(Debug, Clone)]
pub struct SimTransport {
    shared: Arc<Shared>,
}

impl SimTransport {
    /// Create a transport and the server that receives its connections.
    pub fn new() -> (Self, SimServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            online: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            failing_sends: Arc::new(AtomicUsize::new(0)),
            accept_tx,
        };
        (Self { shared: Arc::new(shared) }, SimServer { accept_rx })
    }

    /// Make subsequent connection attempts fail (or succeed again).
    pub fn set_online(&self, online: bool) {
        self.shared.online.store(online, Ordering::SeqCst);
    }

    /// Make the next `count` sends on any connection fail. The connection
    /// itself stays up.
    pub fn fail_sends(&self, count: usize) {
        self.shared.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts so far, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Sink = SimSink;
    type Stream = SimStream;

    async fn connect(&self, url: &str) -> Result<(Self::Sink, Self::Stream), TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.shared.online.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("network unreachable".into()));
        }

        let (to_peer, from_agent) = mpsc::unbounded_channel();
        let (to_agent, from_peer) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed = Arc::new(closed_tx);

        let peer = SimPeer {
            url: url.to_string(),
            rx: from_agent,
            tx: Some(to_agent),
            closed: Arc::clone(&closed),
        };
        self.shared
            .accept_tx
            .send(peer)
            .map_err(|_| TransportError::Connect("connection refused".into()))?;

        tracing::debug!(url, "simulated connection opened");
        Ok((
            SimSink { tx: to_peer, closed, failing: Arc::clone(&self.shared.failing_sends) },
            SimStream { rx: from_peer, closed: closed_rx, ended: false },
        ))
    }
}

/// Agent side sending half.
#[derive(Debug)]
pub struct SimSink {
    tx: mpsc::UnboundedSender<Frame>,
    closed: Arc<watch::Sender<bool>>,
    failing: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSink for SimSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        let injected = self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Send(format!("injected failure ({})", frame.kind())));
        }
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !*self.closed.borrow() {
            let _ = self.tx.send(Frame::Close(None));
        }
        self.closed.send_replace(true);
        Ok(())
    }
}

impl Drop for SimSink {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

/// Agent side receiving half.
#[derive(Debug)]
pub struct SimStream {
    rx: mpsc::UnboundedReceiver<Frame>,
    closed: watch::Receiver<bool>,
    ended: bool,
}

#[async_trait]
impl FrameStream for SimStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        if self.ended {
            return None;
        }

        tokio::select! {
            biased;
            frame = self.rx.recv() => match frame {
                Some(frame) => Some(Ok(frame)),
                None => {
                    self.ended = true;
                    if *self.closed.borrow() {
                        None
                    } else {
                        Some(Err(TransportError::Reset("connection reset by peer".into())))
                    }
                },
            },
            () = wait_closed(&mut self.closed) => {
                self.ended = true;
                None
            },
        }
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

/// Accepts the agent's connections.
#[derive(Debug)]
pub struct SimServer {
    accept_rx: mpsc::UnboundedReceiver<SimPeer>,
}

impl SimServer {
    /// Wait for the next connection.
    ///
    /// Returns `None` once every transport handle is gone.
    pub async fn accept(&mut self) -> Option<SimPeer> {
        self.accept_rx.recv().await
    }

    /// Next connection if one is already waiting.
    pub fn try_accept(&mut self) -> Option<SimPeer> {
        self.accept_rx.try_recv().ok()
    }
}

/// Remote controller end of one connection.
///
/// Dropping a peer without [`SimPeer::close`] simulates a network failure.
#[derive(Debug)]
pub struct SimPeer {
    url: String,
    rx: mpsc::UnboundedReceiver<Frame>,
    tx: Option<mpsc::UnboundedSender<Frame>>,
    closed: Arc<watch::Sender<bool>>,
}

impl SimPeer {
    /// Address the agent connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether either side has closed the connection.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Next frame from the agent, answering pings along the way.
    ///
    /// Returns `None` once the agent has closed the connection.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.rx.recv().await? {
                Frame::Ping(data) => self.send(Frame::Pong(data)),
                Frame::Close(_) => return None,
                frame => return Some(frame),
            }
        }
    }

    /// Next text frame from the agent, skipping other kinds.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            if let Frame::Text(text) = self.recv().await? {
                return Some(text);
            }
        }
    }

    /// Next text frame decoded as a response.
    pub async fn recv_response(&mut self) -> Option<Response> {
        let text = self.recv_text().await?;
        Response::decode(&text).ok()
    }

    /// Next frame without answering pings. `None` if nothing is queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Send a frame to the agent. Silently dropped once closed.
    pub fn send(&self, frame: Frame) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(frame);
        }
    }

    /// Send a text frame to the agent.
    pub fn send_text(&self, text: &str) {
        self.send(Frame::text(text));
    }

    /// Close the connection with a normal close frame.
    pub fn close(&mut self) {
        self.send(Frame::Close(Some(CloseReason { code: 1000, reason: String::new() })));
        self.closed.send_replace(true);
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (transport, mut server) = SimTransport::new();
        let (mut sink, mut stream) = transport.connect("ws://host:1/").await.unwrap();
        let mut peer = server.accept().await.unwrap();

        assert_eq!(peer.url(), "ws://host:1/");

        sink.send(Frame::text("hello")).await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("hello"));

        peer.send_text("world");
        assert_eq!(stream.next_frame().await.unwrap().unwrap(), Frame::text("world"));
    }

    #[tokio::test]
    async fn peer_answers_pings() {
        let (transport, mut server) = SimTransport::new();
        let (mut sink, mut stream) = transport.connect("ws://host:1/").await.unwrap();
        let mut peer = server.accept().await.unwrap();

        sink.send(Frame::Ping(vec![7])).await.unwrap();
        sink.send(Frame::text("after")).await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("after"));
        assert_eq!(stream.next_frame().await.unwrap().unwrap(), Frame::Pong(vec![7]));
    }

    #[tokio::test]
    async fn agent_close_ends_both_sides() {
        let (transport, mut server) = SimTransport::new();
        let (mut sink, mut stream) = transport.connect("ws://host:1/").await.unwrap();
        let mut peer = server.accept().await.unwrap();

        sink.close().await.unwrap();

        assert!(peer.is_closed());
        assert_eq!(peer.recv().await, None);
        assert!(stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn peer_close_delivers_close_frame_then_ends() {
        let (transport, mut server) = SimTransport::new();
        let (_sink, mut stream) = transport.connect("ws://host:1/").await.unwrap();
        let mut peer = server.accept().await.unwrap();

        peer.close();

        assert!(matches!(stream.next_frame().await, Some(Ok(Frame::Close(Some(_))))));
        assert!(stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn dropped_peer_is_a_reset() {
        let (transport, mut server) = SimTransport::new();
        let (_sink, mut stream) = transport.connect("ws://host:1/").await.unwrap();
        drop(server.accept().await.unwrap());

        assert!(matches!(stream.next_frame().await, Some(Err(TransportError::Reset(_)))));
        assert!(stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn injected_send_failure_keeps_connection() {
        let (transport, mut server) = SimTransport::new();
        transport.fail_sends(1);
        let (mut sink, _stream) = transport.connect("ws://host:1/").await.unwrap();
        let mut peer = server.accept().await.unwrap();

        assert!(matches!(sink.send(Frame::text("lost")).await, Err(TransportError::Send(_))));
        sink.send(Frame::text("kept")).await.unwrap();

        assert!(!peer.is_closed());
        assert_eq!(peer.recv_text().await.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn offline_refuses_connections() {
        let (transport, mut server) = SimTransport::new();
        transport.set_online(false);

        let result = transport.connect("ws://host:1/").await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(transport.connect_attempts(), 1);
        assert!(server.try_accept().is_none());
    }
}
