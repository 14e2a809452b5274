//! A real agent wired to simulated collaborators.

use stasis_agent::{Agent, AgentConfig};
use stasis_core::StatusUpdate;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{SimEnv, SimPeer, SimRunner, SimServer, SimTransport};

/// Agent running on [`SimEnv`], [`SimTransport`] and [`SimRunner`].
pub struct SimAgent {
    /// Facade handle
    pub agent: Agent,
    /// Accepts the agent's connections
    pub server: SimServer,
    /// Transport handle for fault injection and counters
    pub transport: SimTransport,
    /// Record of issued commands
    pub runner: SimRunner,
    status: broadcast::Receiver<StatusUpdate>,
    task: JoinHandle<()>,
}

impl SimAgent {
    /// Start with default configuration.
    pub fn start() -> Self {
        Self::with_config(AgentConfig::default())
    }

    /// Start with `config`.
    pub fn with_config(config: AgentConfig) -> Self {
        let (transport, server) = SimTransport::new();
        let runner = SimRunner::new();
        let (agent, task) = Agent::spawn(SimEnv, transport.clone(), runner.clone(), config);
        let status = agent.subscribe();
        Self { agent, server, transport, runner, status, task }
    }

    /// Connect, accept the connection and consume the registration frame.
    ///
    /// Returns the peer once the agent reports itself connected, or `None`
    /// if any step fails.
    pub async fn connect_peer(&mut self, url: &str, key: &str, packages: &str) -> Option<SimPeer> {
        self.agent.connect(url, key, packages).await.ok()?;
        let mut peer = self.server.accept().await?;
        peer.recv_text().await?;
        self.agent.wait_for(|snapshot| snapshot.connected).await.ok()?;
        Some(peer)
    }

    /// Status updates published since the last call.
    pub fn drain_status(&mut self) -> Vec<StatusUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.status.try_recv() {
            updates.push(update);
        }
        updates
    }

    /// Destroy the agent, drop the handle and wait for its task to finish.
    pub async fn shutdown(self) {
        self.agent.destroy().await;
        drop(self.agent);
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "agent task failed");
        }
    }
}
