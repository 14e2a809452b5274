//! Turmoil-backed dialer.
//!
//! Plugs turmoil's simulated TCP under the production WebSocket transport,
//! so full handshakes and framing run over a deterministic network with
//! partitions, latency and host crashes.

use std::io;

use async_trait::async_trait;
use stasis_agent::Dialer;
use turmoil::net::TcpStream;

/// Dials hosts registered in the surrounding turmoil simulation.
///
/// Must be used from inside a turmoil host or client.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurmoilDialer;

#[async_trait]
impl Dialer for TurmoilDialer {
    type Stream = TcpStream;

    async fn dial(&self, host: &str, port: u16) -> io::Result<Self::Stream> {
        let addr = format!("{host}:{port}");
        TcpStream::connect(addr.as_str()).await
    }
}
