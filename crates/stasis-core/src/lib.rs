//! stasis agent core logic
//!
//! Pure logic for the remote suspension agent, decoupled from sockets,
//! processes and clocks so it can be tested deterministically.
//!
//! # Architecture
//!
//! The connection lifecycle is a state machine ([`manager::ConnectionManager`])
//! that never performs I/O. Each input (a caller request, a transport
//! notification, a timer expiry, a clock tick) produces an ordered list of
//! [`manager::ManagerAction`]s describing the intended effects. A runtime
//! executes those actions and feeds the resulting notifications back in.
//!
//! The side-effecting parts (opening connections, running privileged
//! commands, sleeping) are reached through the [`transport::Transport`],
//! [`exec::CommandRunner`] and [`env::Environment`] traits so that production
//! and simulation share all decision logic.
//!
//! # Components
//!
//! - [`manager`]: Connection manager state machine (connect, reconnect, dispatch)
//! - [`session`]: Session configuration and package list parsing
//! - [`packages`]: Package controller (suspend/unsuspend batches)
//! - [`exec`]: Command executor over the privileged runner seam
//! - [`status`]: Human-readable status updates for the local caller
//! - [`mod@env`]: Environment abstraction (time)
//! - [`transport`]: Transport abstraction (message-oriented connections)
//! - [`error`]: Error types

pub mod env;
pub mod error;
pub mod exec;
pub mod manager;
pub mod packages;
pub mod session;
pub mod status;
pub mod transport;

pub use env::Environment;
pub use error::{ConfigError, ExecError, TransportError};
pub use exec::{CommandExecutor, CommandLine, CommandRunner, Execution, RawOutput};
pub use manager::{
    ConnectionManager, DispatchOrigin, Generation, ManagerAction, ManagerConfig, ManagerState,
};
pub use packages::{
    ApplyReport, CommandTemplates, FailurePolicy, PackageAction, PackageController,
};
pub use session::{Session, SessionConfig, SessionId, parse_package_list};
pub use status::StatusUpdate;
pub use transport::{FrameSink, FrameStream, Transport};
