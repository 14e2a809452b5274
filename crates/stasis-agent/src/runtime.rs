//! Agent runtime.
//!
//! One actor task owns the [`ConnectionManager`] and is the only place its
//! state changes. Everything else reaches it through two channels:
//!
//! - requests from the [`crate::Agent`] facade (connect, disconnect, ...)
//! - link events from the tasks it spawned (transport opened or failed,
//!   frames, closes, reconnect timer expiry)
//!
//! Each input is handed to the manager and the returned actions are executed
//! in order before the next input is taken. Closing a transport and running
//! package commands are awaited inline, so a slow peer or a hung command
//! delays everything behind it.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use stasis_core::{
    CommandRunner, ConnectionManager, Environment, FrameSink, FrameStream, Generation,
    ManagerAction, ManagerState, PackageController, SessionConfig, SessionId, StatusUpdate,
    Transport, TransportError,
};
use stasis_proto::Frame;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::AgentConfig;

/// Point-in-time view of the agent, readable without blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Manager lifecycle state
    pub state: ManagerState,
    /// Whether a transport is open
    pub connected: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self { state: ManagerState::Idle, connected: false }
    }
}

/// Facade request. Each carries a reply channel completed once the request's
/// actions have run.
#[derive(Debug)]
pub(crate) enum Request {
    Connect { config: SessionConfig, reply: oneshot::Sender<()> },
    Disconnect { reply: oneshot::Sender<()> },
    ExecuteAction { action: String, key: String, reply: oneshot::Sender<()> },
    Destroy { reply: oneshot::Sender<()> },
}

enum LinkEvent<T: Transport> {
    Opened { generation: Generation, sink: T::Sink, stream: T::Stream },
    OpenFailed { generation: Generation, error: TransportError },
    Frame { generation: Generation, frame: Frame },
    Closed { generation: Generation, reason: String },
    ReconnectElapsed { session: SessionId },
}

/// The one transport instance the runtime may hold.
enum Slot<S> {
    Empty,
    Connecting { generation: Generation, task: JoinHandle<()> },
    Open { generation: Generation, sink: S, pump: JoinHandle<()> },
}

impl<S> Slot<S> {
    fn generation(&self) -> Option<Generation> {
        match self {
            Self::Empty => None,
            Self::Connecting { generation, .. } | Self::Open { generation, .. } => Some(*generation),
        }
    }
}

pub(crate) struct Runtime<E, T, R>
where
    E: Environment,
    T: Transport,
    R: CommandRunner,
{
    env: E,
    transport: Arc<T>,
    controller: PackageController<R>,
    manager: ConnectionManager,
    tick_interval: Duration,

    slot: Slot<T::Sink>,
    reconnect_timer: Option<JoinHandle<()>>,

    requests: mpsc::Receiver<Request>,
    events_tx: mpsc::UnboundedSender<LinkEvent<T>>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent<T>>,
    snapshot: watch::Sender<Snapshot>,
    status: broadcast::Sender<StatusUpdate>,
}

impl<E, T, R> Runtime<E, T, R>
where
    E: Environment,
    T: Transport,
    R: CommandRunner,
{
    pub(crate) fn new(
        env: E,
        transport: T,
        runner: R,
        config: AgentConfig,
        requests: mpsc::Receiver<Request>,
        snapshot: watch::Sender<Snapshot>,
        status: broadcast::Sender<StatusUpdate>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            env,
            transport: Arc::new(transport),
            controller: PackageController::new(runner, config.templates, config.policy),
            manager: ConnectionManager::new(config.manager),
            tick_interval: config.tick_interval,
            slot: Slot::Empty,
            reconnect_timer: None,
            requests,
            events_tx,
            events_rx,
            snapshot,
            status,
        }
    }

    /// Run until every facade handle is dropped.
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        tracing::debug!("all agent handles dropped");
                        break;
                    };
                    self.handle_request(request).await;
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                _ = ticker.tick() => {
                    let actions = self.manager.tick(self.env.now());
                    self.run_actions(actions).await;
                },
            }
        }

        let actions = self.manager.destroy();
        self.run_actions(actions).await;
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        tracing::debug!("agent runtime stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { config, reply } => {
                let actions = self.manager.connect(config, self.env.now());
                self.run_actions(actions).await;
                let _ = reply.send(());
            },
            Request::Disconnect { reply } => {
                let actions = self.manager.disconnect();
                self.run_actions(actions).await;
                let _ = reply.send(());
            },
            Request::ExecuteAction { action, key, reply } => {
                let actions = self.manager.execute_local(&action, &key);
                self.run_actions(actions).await;
                let _ = reply.send(());
            },
            Request::Destroy { reply } => {
                let actions = self.manager.destroy();
                self.run_actions(actions).await;
                let _ = reply.send(());
            },
        }
    }

    async fn handle_event(&mut self, event: LinkEvent<T>) {
        let actions = match event {
            LinkEvent::Opened { generation, sink, stream } => {
                self.on_opened(generation, sink, stream).await
            },
            LinkEvent::OpenFailed { generation, error } => {
                if self.slot.generation() == Some(generation) {
                    self.slot = Slot::Empty;
                }
                self.manager.transport_failed(generation, &error.to_string())
            },
            LinkEvent::Frame { generation, frame } => {
                self.manager.frame_received(generation, frame, self.env.now())
            },
            LinkEvent::Closed { generation, reason } => {
                if self.slot.generation() == Some(generation) {
                    self.slot = Slot::Empty;
                }
                self.manager.transport_failed(generation, &reason)
            },
            LinkEvent::ReconnectElapsed { session } => {
                self.manager.reconnect_elapsed(session, self.env.now())
            },
        };
        self.run_actions(actions).await;
    }

    async fn on_opened(
        &mut self,
        generation: Generation,
        mut sink: T::Sink,
        stream: T::Stream,
    ) -> Vec<ManagerAction> {
        let current =
            matches!(self.slot, Slot::Connecting { generation: g, .. } if g == generation);
        if !current {
            tracing::debug!(%generation, "closing transport that opened after it was abandoned");
            if let Err(err) = sink.close().await {
                tracing::debug!(%generation, error = %err, "close of abandoned transport failed");
            }
            drop(stream);
            return Vec::new();
        }

        let pump = self.spawn_pump(generation, stream);
        self.slot = Slot::Open { generation, sink, pump };
        self.manager.transport_opened(generation, self.env.now())
    }

    /// Execute actions in order. Follow-up actions produced while executing
    /// one run before the rest of the batch.
    async fn run_actions(&mut self, actions: Vec<ManagerAction>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            let follow_up = self.execute(action).await;
            for action in follow_up.into_iter().rev() {
                queue.push_front(action);
            }
        }

        self.snapshot.send_replace(Snapshot {
            state: self.manager.state(),
            connected: self.manager.is_connected(),
        });
    }

    async fn execute(&mut self, action: ManagerAction) -> Vec<ManagerAction> {
        match action {
            ManagerAction::OpenTransport { generation, url } => {
                self.open(generation, url);
                Vec::new()
            },
            ManagerAction::CloseTransport { generation } => {
                self.close(generation).await;
                Vec::new()
            },
            ManagerAction::SendFrame { generation, frame } => self.send(generation, frame).await,
            ManagerAction::SendRegistration { generation, frame } => {
                if let Err(err) = self.try_send(generation, frame).await {
                    // The pump reports a dead transport on its own
                    tracing::warn!(%generation, error = %err, "registration send failed");
                }
                Vec::new()
            },
            ManagerAction::ArmReconnect { session, delay } => {
                self.arm_reconnect(session, delay);
                Vec::new()
            },
            ManagerAction::CancelReconnect => {
                if let Some(timer) = self.reconnect_timer.take() {
                    timer.abort();
                }
                Vec::new()
            },
            ManagerAction::ApplyPackages { origin, action, targets } => {
                let report = self.controller.apply(action, &targets).await;
                self.manager.packages_applied(origin, &report)
            },
            ManagerAction::Status(update) => {
                tracing::debug!(status = %update, "status update");
                // No subscribers is fine
                let _ = self.status.send(update);
                Vec::new()
            },
        }
    }

    fn open(&mut self, generation: Generation, url: String) {
        self.abandon();

        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let event = match transport.connect(&url).await {
                Ok((sink, stream)) => LinkEvent::Opened { generation, sink, stream },
                Err(error) => {
                    tracing::error!(%generation, url, error = %error, "failed to open transport");
                    LinkEvent::OpenFailed { generation, error }
                },
            };
            let _ = events.send(event);
        });

        self.slot = Slot::Connecting { generation, task };
    }

    /// Close the named instance and wait for it, bounded by the transport's
    /// close timeout.
    async fn close(&mut self, generation: Generation) {
        if self.slot.generation() != Some(generation) {
            return;
        }

        match std::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Empty => {},
            Slot::Connecting { task, .. } => task.abort(),
            Slot::Open { mut sink, mut pump, .. } => {
                let bound = self.transport.close_timeout();
                let closing = async {
                    if let Err(err) = sink.close().await {
                        tracing::debug!(%generation, error = %err, "close handshake failed");
                    }
                    let _ = (&mut pump).await;
                };

                if tokio::time::timeout(bound, closing).await.is_err() {
                    tracing::warn!(%generation, ?bound, "close timed out; abandoning transport");
                    pump.abort();
                } else {
                    tracing::debug!(%generation, "transport closed");
                }
            },
        }
    }

    async fn send(&mut self, generation: Generation, frame: Frame) -> Vec<ManagerAction> {
        match self.try_send(generation, frame).await {
            Ok(()) => Vec::new(),
            Err(err) => {
                tracing::error!(%generation, error = %err, "send failed");
                self.abandon();
                self.manager.transport_failed(generation, &err.to_string())
            },
        }
    }

    /// Send on the named instance. A missing or replaced instance drops the
    /// frame and counts as success.
    async fn try_send(
        &mut self,
        generation: Generation,
        frame: Frame,
    ) -> Result<(), TransportError> {
        let Slot::Open { generation: current, sink, .. } = &mut self.slot else {
            tracing::debug!(%generation, "no open transport; frame dropped");
            return Ok(());
        };
        if *current != generation {
            tracing::debug!(%generation, "transport replaced; frame dropped");
            return Ok(());
        }

        let kind = frame.kind();
        sink.send(frame).await?;
        tracing::debug!(%generation, kind, "frame sent");
        Ok(())
    }

    fn arm_reconnect(&mut self, session: SessionId, delay: Duration) {
        if let Some(previous) = self.reconnect_timer.take() {
            previous.abort();
        }

        let env = self.env.clone();
        let events = self.events_tx.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            env.sleep(delay).await;
            let _ = events.send(LinkEvent::ReconnectElapsed { session });
        }));
    }

    /// Drop the current instance without a close handshake.
    fn abandon(&mut self) {
        match std::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Empty => {},
            Slot::Connecting { task, .. } => task.abort(),
            Slot::Open { pump, .. } => pump.abort(),
        }
    }

    fn spawn_pump(&self, generation: Generation, mut stream: T::Stream) -> JoinHandle<()> {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let reason = loop {
                match stream.next_frame().await {
                    Some(Ok(frame)) => {
                        tracing::debug!(%generation, kind = frame.kind(), "frame received");
                        if events.send(LinkEvent::Frame { generation, frame }).is_err() {
                            return;
                        }
                    },
                    Some(Err(err)) => break err.to_string(),
                    None => break "closed by peer".to_string(),
                }
            };
            let _ = events.send(LinkEvent::Closed { generation, reason });
        })
    }
}
