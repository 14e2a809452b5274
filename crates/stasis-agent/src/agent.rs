//! Agent facade.
//!
//! The operations a local caller uses to drive the agent. Every handle talks
//! to the same runtime task, so handles can be cloned freely and used from
//! any task.

use stasis_core::{
    CommandRunner, Environment, ManagerState, SessionConfig, StatusUpdate, Transport,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    AgentConfig, AgentError,
    runtime::{Request, Runtime, Snapshot},
};

const REQUEST_BUFFER: usize = 32;
const STATUS_BUFFER: usize = 64;

/// Handle to a running agent.
#[derive(Debug, Clone)]
pub struct Agent {
    requests: mpsc::Sender<Request>,
    snapshot: watch::Receiver<Snapshot>,
    status: broadcast::Sender<StatusUpdate>,
}

impl Agent {
    /// Start an agent on the current tokio runtime.
    ///
    /// Returns the handle and the runtime task. The task ends once every
    /// handle has been dropped.
    pub fn spawn<E, T, R>(
        env: E,
        transport: T,
        runner: R,
        config: AgentConfig,
    ) -> (Self, JoinHandle<()>)
    where
        E: Environment,
        T: Transport,
        R: CommandRunner,
    {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (status_tx, _) = broadcast::channel(STATUS_BUFFER);

        let runtime = Runtime::new(
            env,
            transport,
            runner,
            config,
            requests_rx,
            snapshot_tx,
            status_tx.clone(),
        );
        let task = tokio::spawn(runtime.run());

        (Self { requests: requests_tx, snapshot: snapshot_rx, status: status_tx }, task)
    }

    /// Start a session.
    ///
    /// `package_list` is newline-delimited; entries are trimmed and blank
    /// lines dropped. Any previous session and connection are replaced.
    /// Returns once the connection attempt has started; the outcome is
    /// reported through [`Agent::subscribe`] and [`Agent::is_connected`].
    ///
    /// # Errors
    ///
    /// - `Config` if the address or key is empty (nothing changes)
    /// - `Stopped` if the runtime task is gone
    pub async fn connect(&self, url: &str, key: &str, package_list: &str) -> Result<(), AgentError> {
        let config = SessionConfig::from_package_list(url, key, package_list)?;
        self.connect_with(config).await
    }

    /// Start a session from an already validated configuration.
    pub async fn connect_with(&self, config: SessionConfig) -> Result<(), AgentError> {
        self.request(|reply| Request::Connect { config, reply }).await
    }

    /// Stop reconnecting and close the connection.
    ///
    /// Blocks until the transport has closed. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        if self.request(|reply| Request::Disconnect { reply }).await.is_err() {
            tracing::debug!("disconnect on stopped agent");
        }
    }

    /// Apply `action` (`start` or `stop`) locally, without the wire protocol.
    ///
    /// Ignored unless `key` equals the session's key. Returns after the
    /// package commands have run.
    pub async fn execute_action(&self, action: &str, key: &str) {
        let (action, key) = (action.to_string(), key.to_string());
        if self.request(|reply| Request::ExecuteAction { action, key, reply }).await.is_err() {
            tracing::debug!("local action on stopped agent");
        }
    }

    /// Whether a connection is currently open. Never blocks.
    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().connected
    }

    /// Current lifecycle state. Never blocks.
    pub fn state(&self) -> ManagerState {
        self.snapshot.borrow().state
    }

    /// Disconnect and return to `Idle`.
    ///
    /// The agent stays usable: a later [`Agent::connect`] starts a new
    /// session. Drop every handle to stop the runtime task.
    pub async fn destroy(&self) {
        if self.request(|reply| Request::Destroy { reply }).await.is_err() {
            tracing::debug!("destroy on stopped agent");
        }
    }

    /// Subscribe to status updates.
    ///
    /// Slow subscribers miss updates rather than stalling the agent.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status.subscribe()
    }

    /// Wait until the snapshot satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` if the runtime ends first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&Snapshot) -> bool,
    ) -> Result<Snapshot, AgentError> {
        let mut snapshot = self.snapshot.clone();
        let current = snapshot.wait_for(|s| predicate(s)).await.map_err(|_| AgentError::Stopped)?;
        Ok(*current)
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<()>) -> Request,
    ) -> Result<(), AgentError> {
        let (reply, done) = oneshot::channel();
        self.requests.send(make(reply)).await.map_err(|_| AgentError::Stopped)?;
        done.await.map_err(|_| AgentError::Stopped)
    }
}
