//! Connection manager state machine.
//!
//! Owns the session, the (single) transport instance and the (single)
//! reconnect timer, and decides what happens on every caller request,
//! transport notification and timer expiry.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as a parameter where it matters
//! - Methods return `Vec<ManagerAction>`, executed in order by a runtime
//! - The runtime reports outcomes back (`transport_opened`,
//!   `frame_received`, `transport_failed`, `reconnect_elapsed`,
//!   `packages_applied`)
//!
//! Nothing here performs I/O, so every transition is testable with plain
//! method calls.
//!
//! # State Machine
//!
//! ```text
//!          connect            opened
//! ┌──────┐ ───────> ┌────────────┐ ──────> ┌──────┐
//! │ Idle │          │ Connecting │         │ Open │
//! └──────┘          └────────────┘         └──────┘
//!                     ↑      │ failed         │ closed / error / lost
//!          timer      │      ↓                ↓
//!          expiry   ┌──────────────────────────────┐
//!                   │       ReconnectPending       │
//!                   └──────────────────────────────┘
//!
//!   disconnect (any state) ──> Disconnected     destroy (any state) ──> Idle
//! ```
//!
//! # Generations
//!
//! Every transport instance gets a fresh [`Generation`]. Notifications carry
//! the generation they belong to; anything that does not name the current
//! instance is stale and ignored. A replaced or abandoned transport can
//! therefore never schedule a reconnect or have its messages dispatched.
//!
//! # Reconnect
//!
//! A fixed delay (5 seconds by default), no backoff and no retry limit. At
//! most one timer is outstanding. Expiry only reconnects if the
//! should-reconnect flag is still set *and* the timer was armed for the
//! current session.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use stasis_proto::{Command, Frame, Register, Response};

use crate::{ApplyReport, PackageAction, Session, SessionConfig, SessionId, StatusUpdate};

/// Identity of one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Where a package action was requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrigin {
    /// Inbound wire command on the given transport instance
    Remote {
        /// Transport instance the command arrived on
        generation: Generation,
    },
    /// Trusted local caller
    Local,
}

/// Actions returned by the connection manager.
///
/// The runtime executes them in order:
/// - `OpenTransport`: start an asynchronous open, report the outcome
/// - `CloseTransport`: close the instance and wait until it is closed
/// - `SendFrame`: send on the instance if it is still the open one; a failed
///   send loses the transport
/// - `SendRegistration`: like `SendFrame`, but a failed send is only logged
/// - `ArmReconnect`: cancel any timer, then start one for `delay`
/// - `CancelReconnect`: discard the pending timer
/// - `ApplyPackages`: run the package controller, report via
///   [`ConnectionManager::packages_applied`]
/// - `Status`: publish to the local caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerAction {
    /// Open a new transport instance
    OpenTransport {
        /// Identity of the new instance
        generation: Generation,
        /// Server address
        url: String,
    },

    /// Close a transport instance (blocking)
    CloseTransport {
        /// Instance to close
        generation: Generation,
    },

    /// Send a frame
    SendFrame {
        /// Instance to send on
        generation: Generation,
        /// Frame to send
        frame: Frame,
    },

    /// Send the registration frame. Failure leaves the transport open.
    SendRegistration {
        /// Instance to send on
        generation: Generation,
        /// Frame to send
        frame: Frame,
    },

    /// Arm the reconnect timer
    ArmReconnect {
        /// Session the timer belongs to
        session: SessionId,
        /// Delay before expiry
        delay: Duration,
    },

    /// Cancel the reconnect timer
    CancelReconnect,

    /// Apply an action to the managed applications
    ApplyPackages {
        /// Requester
        origin: DispatchOrigin,
        /// Suspend or unsuspend
        action: PackageAction,
        /// Snapshot of the session's targets
        targets: Arc<[String]>,
    },

    /// Publish a status update
    Status(StatusUpdate),
}

/// Lifecycle state of the manager.
///
/// Closing and error conditions are transitional: they resolve to
/// `ReconnectPending` or `Disconnected` within the same transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No session yet, or destroyed
    Idle,
    /// Transport open in progress
    Connecting,
    /// Transport open; commands are dispatched
    Open,
    /// Transport lost; reconnect timer armed
    ReconnectPending,
    /// Explicitly disconnected
    Disconnected,
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Fixed delay before a reconnect attempt
    pub reconnect_delay: Duration,
    /// Keepalive interval; `None` disables connection-lost detection
    ///
    /// A ping is sent every interval, and the connection is treated as lost
    /// after 1.5 intervals without any inbound frame.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            heartbeat_interval: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone)]
struct Link {
    generation: Generation,
    open: bool,
    last_activity: Instant,
    last_ping: Instant,
}

/// Connection manager state machine.
///
/// This is a pure state machine - no I/O, no clock, no task spawning.
#[derive(Debug)]
pub struct ConnectionManager {
    config: ManagerConfig,
    state: ManagerState,
    session: Option<Session>,
    should_reconnect: bool,
    pending_reconnect: Option<SessionId>,
    link: Option<Link>,
    sessions_created: u64,
    generations_created: u64,
}

impl ConnectionManager {
    /// Create a manager in `Idle` state.
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            state: ManagerState::Idle,
            session: None,
            should_reconnect: false,
            pending_reconnect: None,
            link: None,
            sessions_created: 0,
            generations_created: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Configuration in force.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Active session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Whether reconnection is still desired.
    pub fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    /// Whether a reconnect timer is outstanding.
    pub fn reconnect_pending(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    /// Generation of the current transport instance, open or not.
    pub fn current_generation(&self) -> Option<Generation> {
        self.link.as_ref().map(|link| link.generation)
    }

    /// True iff a transport instance exists and is open.
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.open)
    }

    /// Start a new session, replacing any previous one.
    ///
    /// Any existing transport is closed first, then a fresh one is opened.
    /// A pending reconnect timer is cancelled.
    pub fn connect(&mut self, config: SessionConfig, now: Instant) -> Vec<ManagerAction> {
        self.sessions_created += 1;
        let session = Session::new(self.sessions_created, config);
        tracing::info!(
            session = %session.id(),
            url = session.url(),
            targets = session.targets().len(),
            "connect requested"
        );

        self.session = Some(session);
        self.should_reconnect = true;

        let mut actions = Vec::new();
        self.cancel_reconnect(&mut actions);
        self.start_transport(now, &mut actions);
        actions
    }

    /// The transport instance `generation` finished opening.
    pub fn transport_opened(&mut self, generation: Generation, now: Instant) -> Vec<ManagerAction> {
        let Some(link) =
            self.link.as_mut().filter(|link| link.generation == generation && !link.open)
        else {
            tracing::debug!(%generation, "ignoring open of stale transport");
            return Vec::new();
        };

        link.open = true;
        link.last_activity = now;
        link.last_ping = now;
        self.state = ManagerState::Open;
        tracing::info!(%generation, "transport open");

        let mut actions = vec![ManagerAction::Status(StatusUpdate::Connected)];
        if let Some(session) = &self.session {
            match Register::new(session.key()).encode() {
                Ok(text) => {
                    actions.push(ManagerAction::SendRegistration {
                        generation,
                        frame: Frame::Text(text),
                    });
                },
                Err(err) => tracing::error!(error = %err, "failed to encode registration"),
            }
        }
        actions
    }

    /// The transport instance `generation` failed to open, errored or closed.
    pub fn transport_failed(&mut self, generation: Generation, reason: &str) -> Vec<ManagerAction> {
        if self.current_generation() != Some(generation) {
            tracing::debug!(%generation, reason, "ignoring failure of stale transport");
            return Vec::new();
        }

        tracing::warn!(%generation, reason, "transport closed");
        self.link = None;

        let mut actions = Vec::new();
        self.after_transport_loss(reason, &mut actions);
        actions
    }

    /// The reconnect timer armed for `session` expired.
    pub fn reconnect_elapsed(&mut self, session: SessionId, now: Instant) -> Vec<ManagerAction> {
        if self.pending_reconnect != Some(session) {
            tracing::debug!(%session, "ignoring stale reconnect timer");
            return Vec::new();
        }
        self.pending_reconnect = None;

        let current = self.session.as_ref().map(Session::id);
        if !self.should_reconnect || current != Some(session) || self.link.is_some() {
            return Vec::new();
        }

        tracing::info!(%session, "attempting to reconnect");
        let mut actions = Vec::new();
        self.start_transport(now, &mut actions);
        actions
    }

    /// A frame arrived on transport instance `generation`.
    ///
    /// Frames are handled strictly in arrival order; text frames are decoded
    /// and dispatched, everything else only counts as activity.
    pub fn frame_received(
        &mut self,
        generation: Generation,
        frame: Frame,
        now: Instant,
    ) -> Vec<ManagerAction> {
        let Some(link) =
            self.link.as_mut().filter(|link| link.generation == generation && link.open)
        else {
            tracing::debug!(%generation, kind = frame.kind(), "ignoring frame from stale transport");
            return Vec::new();
        };
        link.last_activity = now;

        match frame {
            Frame::Text(text) => self.handle_text(generation, &text),
            Frame::Binary(data) => {
                tracing::debug!(%generation, len = data.len(), "ignoring binary frame");
                Vec::new()
            },
            Frame::Ping(_) | Frame::Pong(_) => Vec::new(),
            Frame::Close(reason) => {
                tracing::debug!(%generation, ?reason, "peer started close");
                Vec::new()
            },
        }
    }

    /// A package batch requested by this manager finished.
    pub fn packages_applied(
        &mut self,
        origin: DispatchOrigin,
        report: &ApplyReport,
    ) -> Vec<ManagerAction> {
        let mut actions = Vec::new();

        if let DispatchOrigin::Remote { generation } = origin {
            let open = self.link.as_ref().is_some_and(|l| l.generation == generation && l.open);
            if open {
                actions.extend(respond(generation, &report.response()));
            } else {
                tracing::debug!(%generation, "connection gone; response dropped");
            }
        }

        actions.push(ManagerAction::Status(StatusUpdate::ActionApplied {
            origin,
            action: report.action,
            failed: report.failed(),
            total: report.total(),
        }));
        actions
    }

    /// A locally triggered action.
    ///
    /// The key must equal the session's key exactly; otherwise the action is
    /// ignored. No response is produced since there is no remote peer.
    pub fn execute_local(&self, action: &str, key: &str) -> Vec<ManagerAction> {
        let Some(session) = self.session.as_ref().filter(|s| s.key_matches(key)) else {
            tracing::warn!(action, "invalid key, ignoring local action");
            return vec![ManagerAction::Status(StatusUpdate::LocalActionIgnored {
                reason: "Invalid key".to_string(),
            })];
        };

        match PackageAction::from_wire(action) {
            Some(action) => vec![ManagerAction::ApplyPackages {
                origin: DispatchOrigin::Local,
                action,
                targets: session.targets(),
            }],
            None => {
                tracing::warn!(action, "unknown local action");
                vec![ManagerAction::Status(StatusUpdate::LocalActionIgnored {
                    reason: format!("Unknown action: {action}"),
                })]
            },
        }
    }

    /// Stop reconnecting, cancel the timer and close the transport.
    ///
    /// Idempotent: a second call produces no actions.
    pub fn disconnect(&mut self) -> Vec<ManagerAction> {
        self.should_reconnect = false;

        let mut actions = Vec::new();
        self.cancel_reconnect(&mut actions);
        if let Some(link) = self.link.take() {
            actions.push(ManagerAction::CloseTransport { generation: link.generation });
        }
        self.session = None;

        let announce = !matches!(self.state, ManagerState::Disconnected | ManagerState::Idle);
        self.state = ManagerState::Disconnected;
        if announce {
            tracing::info!("disconnected");
            actions.push(ManagerAction::Status(StatusUpdate::Disconnected));
        }
        actions
    }

    /// Same effect as [`Self::disconnect`], ending in `Idle`.
    pub fn destroy(&mut self) -> Vec<ManagerAction> {
        let actions = self.disconnect();
        self.state = ManagerState::Idle;
        actions
    }

    /// Drive keepalive and connection-lost detection.
    ///
    /// Call periodically (e.g. every second).
    pub fn tick(&mut self, now: Instant) -> Vec<ManagerAction> {
        let Some(interval) = self.config.heartbeat_interval else {
            return Vec::new();
        };
        let Some(link) = self.link.as_mut().filter(|link| link.open) else {
            return Vec::new();
        };

        let idle = now.saturating_duration_since(link.last_activity);
        if idle > interval * 3 / 2 {
            let generation = link.generation;
            self.link = None;

            let reason = format!("no traffic for {}s", idle.as_secs());
            tracing::warn!(%generation, reason, "connection lost");

            let mut actions = vec![ManagerAction::CloseTransport { generation }];
            self.after_transport_loss(&reason, &mut actions);
            return actions;
        }

        if now.saturating_duration_since(link.last_ping) >= interval {
            link.last_ping = now;
            return vec![ManagerAction::SendFrame {
                generation: link.generation,
                frame: Frame::Ping(Vec::new()),
            }];
        }

        Vec::new()
    }

    fn start_transport(&mut self, now: Instant, actions: &mut Vec<ManagerAction>) {
        if let Some(previous) = self.link.take() {
            actions.push(ManagerAction::CloseTransport { generation: previous.generation });
        }

        let Some(session) = &self.session else {
            return;
        };

        self.generations_created += 1;
        let generation = Generation(self.generations_created);
        self.link = Some(Link { generation, open: false, last_activity: now, last_ping: now });
        self.state = ManagerState::Connecting;

        let url = session.url().to_string();
        tracing::debug!(%generation, url, "opening transport");
        actions.push(ManagerAction::Status(StatusUpdate::Connecting { url: url.clone() }));
        actions.push(ManagerAction::OpenTransport { generation, url });
    }

    fn after_transport_loss(&mut self, reason: &str, actions: &mut Vec<ManagerAction>) {
        let session = if self.should_reconnect { self.session.as_ref().map(Session::id) } else { None };

        let Some(session) = session else {
            self.state = ManagerState::Disconnected;
            actions.push(ManagerAction::Status(StatusUpdate::Disconnected));
            return;
        };

        let delay = self.config.reconnect_delay;
        if self.pending_reconnect.is_none() {
            self.pending_reconnect = Some(session);
            actions.push(ManagerAction::ArmReconnect { session, delay });
        }
        self.state = ManagerState::ReconnectPending;
        actions.push(ManagerAction::Status(StatusUpdate::Reconnecting {
            reason: reason.to_string(),
            delay,
        }));
    }

    fn cancel_reconnect(&mut self, actions: &mut Vec<ManagerAction>) {
        if self.pending_reconnect.take().is_some() {
            actions.push(ManagerAction::CancelReconnect);
        }
    }

    fn handle_text(&self, generation: Generation, text: &str) -> Vec<ManagerAction> {
        tracing::debug!(%generation, message = text, "message received");

        let command = match Command::decode(text) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(%generation, error = %err, "undecodable message");
                return respond(generation, &Response::invalid_format());
            },
        };

        let session = self
            .session
            .as_ref()
            .filter(|s| !command.key.is_empty() && s.key_matches(&command.key));
        let Some(session) = session else {
            tracing::warn!(%generation, "invalid or missing key in message");
            return reject(generation, &Response::invalid_key());
        };

        match PackageAction::from_wire(&command.action) {
            Some(action) => vec![ManagerAction::ApplyPackages {
                origin: DispatchOrigin::Remote { generation },
                action,
                targets: session.targets(),
            }],
            None => {
                tracing::warn!(%generation, action = command.action, "unknown action");
                reject(generation, &Response::unknown_action(&command.action))
            },
        }
    }
}

fn respond(generation: Generation, response: &Response) -> Vec<ManagerAction> {
    match response.encode() {
        Ok(text) => vec![ManagerAction::SendFrame { generation, frame: Frame::Text(text) }],
        Err(err) => {
            tracing::error!(error = %err, "failed to encode response");
            Vec::new()
        },
    }
}

fn reject(generation: Generation, response: &Response) -> Vec<ManagerAction> {
    let mut actions = respond(generation, response);
    actions.push(ManagerAction::Status(StatusUpdate::CommandRejected {
        reason: response.message.clone(),
    }));
    actions
}
