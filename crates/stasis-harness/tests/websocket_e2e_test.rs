//! End-to-end runs of the production WebSocket transport over turmoil.
//!
//! The controller is a plain tokio-tungstenite server on a simulated host;
//! the agent dials it through [`TurmoilDialer`], so handshakes, framing and
//! close codes all go through the real stack.

use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use stasis_agent::{Agent, AgentConfig, WsTransport};
use stasis_harness::{SimEnv, SimRunner, TurmoilDialer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};
use turmoil::net::TcpListener;

const SERVER_URL: &str = "ws://controller:8080";
const REGISTER: &str = r#"{"type":"register","key":"k1"}"#;

async fn next_text<S>(ws: &mut WebSocketStream<S>) -> Result<String, Box<dyn Error>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = ws.next().await {
        if let Message::Text(text) = message? {
            return Ok(text.to_string());
        }
    }
    Err("connection ended".into())
}

async fn wait_until(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[test]
fn remote_stop_over_websocket() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(60)).build();
    let verified = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&verified);
    sim.host("controller", move || {
        let flag = Arc::clone(&flag);
        async move {
            let listener = TcpListener::bind("0.0.0.0:8080").await?;
            let (stream, _) = listener.accept().await?;
            let mut ws = tokio_tungstenite::accept_async(stream).await?;

            assert_eq!(next_text(&mut ws).await?, REGISTER);

            ws.send(Message::text(r#"{"action":"stop","key":"k1"}"#)).await?;
            assert_eq!(
                next_text(&mut ws).await?,
                r#"{"status":"success","message":"Packages suspended"}"#
            );

            ws.send(Message::text(r#"{"action":"stop","key":"bad"}"#)).await?;
            assert_eq!(
                next_text(&mut ws).await?,
                r#"{"status":"error","message":"Invalid key"}"#
            );

            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });

    sim.client("agent", async move {
        let runner = SimRunner::new();
        let transport = WsTransport::with_dialer(TurmoilDialer);
        let (agent, task) =
            Agent::spawn(SimEnv, transport, runner.clone(), AgentConfig::default());

        agent.connect(SERVER_URL, "k1", "com.a\ncom.b\n").await?;
        wait_until(&verified).await;

        assert_eq!(runner.commands(), ["pm suspend com.a", "pm suspend com.b"]);

        agent.destroy().await;
        drop(agent);
        task.await?;
        Ok(())
    });

    sim.run().unwrap();
}

#[test]
fn agent_redials_after_server_drops_socket() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(60)).build();
    let reconnected = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&reconnected);
    sim.host("controller", move || {
        let flag = Arc::clone(&flag);
        async move {
            let listener = TcpListener::bind("0.0.0.0:8080").await?;

            let (stream, _) = listener.accept().await?;
            let mut first = tokio_tungstenite::accept_async(stream).await?;
            assert_eq!(next_text(&mut first).await?, REGISTER);
            drop(first);
            let dropped_at = tokio::time::Instant::now();

            let (stream, _) = listener.accept().await?;
            assert!(dropped_at.elapsed() >= Duration::from_secs(5));
            let mut second = tokio_tungstenite::accept_async(stream).await?;
            assert_eq!(next_text(&mut second).await?, REGISTER);

            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });

    sim.client("agent", async move {
        let transport = WsTransport::with_dialer(TurmoilDialer);
        let (agent, task) =
            Agent::spawn(SimEnv, transport, SimRunner::new(), AgentConfig::default());

        agent.connect(SERVER_URL, "k1", "com.a").await?;
        wait_until(&reconnected).await;
        agent.wait_for(|s| s.connected).await?;

        agent.destroy().await;
        drop(agent);
        task.await?;
        Ok(())
    });

    sim.run().unwrap();
}
