//! WebSocket transport.
//!
//! Real WebSocket framing (tokio-tungstenite) over a pluggable [`Dialer`], so
//! the same code runs on real TCP in production and on turmoil's simulated
//! TCP in tests. `wss://` addresses are upgraded with rustls.

use std::{io, time::Duration};

use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use stasis_core::{FrameSink, FrameStream, Transport, TransportError};
use stasis_proto::{CloseReason, Frame};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, client_async_tls,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        handshake::client::Request,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

/// Default bound on the TCP connect plus WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on the close handshake.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens byte streams to a host and port.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Connected byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `host:port`.
    async fn dial(&self, host: &str, port: u16) -> io::Result<Self::Stream>;
}

/// Dials real TCP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = tokio::net::TcpStream;

    async fn dial(&self, host: &str, port: u16) -> io::Result<Self::Stream> {
        let stream = tokio::net::TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// WebSocket client transport.
#[derive(Debug, Clone)]
pub struct WsTransport<D = TcpDialer> {
    dialer: D,
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl WsTransport<TcpDialer> {
    /// Transport over real TCP with default timeouts.
    pub fn new() -> Self {
        Self::with_dialer(TcpDialer)
    }
}

impl Default for WsTransport<TcpDialer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Dialer> WsTransport<D> {
    /// Transport over a custom dialer with default timeouts.
    pub fn with_dialer(dialer: D) -> Self {
        Self {
            dialer,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Override the connect and close bounds.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, close: Duration) -> Self {
        self.connect_timeout = connect;
        self.close_timeout = close;
        self
    }
}

#[async_trait]
impl<D: Dialer> Transport for WsTransport<D> {
    type Sink = WsSink<D::Stream>;
    type Stream = WsStream<D::Stream>;

    async fn connect(&self, url: &str) -> Result<(Self::Sink, Self::Stream), TransportError> {
        let (request, host, port) = endpoint(url)?;

        let handshake = async {
            let stream = self
                .dialer
                .dial(&host, port)
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))?;
            client_async_tls(request, stream)
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))
        };

        let (socket, response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;
        tracing::debug!(url, status = %response.status(), "websocket handshake complete");

        let (sink, stream) = socket.split();
        Ok((WsSink { inner: sink }, WsStream { inner: stream }))
    }

    fn close_timeout(&self) -> Duration {
        self.close_timeout
    }
}

/// Sending half of a WebSocket connection.
pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<MaybeTlsStream<S>>, Message>,
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.inner.send(to_message(frame)).await.map_err(|err| match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            },
            other => TransportError::Send(other.to_string()),
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            },
            Err(err) => Err(TransportError::Send(err.to_string())),
        }
    }
}

/// Receiving half of a WebSocket connection.
pub struct WsStream<S> {
    inner: SplitStream<WebSocketStream<MaybeTlsStream<S>>>,
}

#[async_trait]
impl<S> FrameStream for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                },
                Err(err) => return Some(Err(TransportError::Reset(err.to_string()))),
            };

            if let Some(frame) = to_frame(message) {
                return Some(Ok(frame));
            }
        }
    }
}

/// Parse a `ws://` or `wss://` address into a handshake request and the
/// host and port to dial.
fn endpoint(url: &str) -> Result<(Request, String, u16), TransportError> {
    let invalid = |reason: &str| TransportError::InvalidAddress {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let request = url.into_client_request().map_err(|err| invalid(&err.to_string()))?;
    let uri = request.uri();

    let default_port = match uri.scheme_str() {
        Some("ws") => 80,
        Some("wss") => 443,
        _ => return Err(invalid("scheme must be ws or wss")),
    };
    let host = uri
        .host()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid("missing host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = uri.port_u16().unwrap_or(default_port);

    Ok((request, host, port))
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close(reason) => Message::Close(reason.map(|reason| CloseFrame {
            code: CloseCode::from(reason.code),
            reason: reason.reason.into(),
        })),
    }
}

fn to_frame(message: Message) -> Option<Frame> {
    let frame = match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data.to_vec()),
        Message::Ping(data) => Frame::Ping(data.to_vec()),
        Message::Pong(data) => Frame::Pong(data.to_vec()),
        Message::Close(close) => Frame::Close(close.map(|close| CloseReason {
            code: u16::from(close.code),
            reason: close.reason.as_str().to_owned(),
        })),
        // Raw frames only surface when reading with a custom config
        Message::Frame(_) => return None,
    };
    Some(frame)
}
