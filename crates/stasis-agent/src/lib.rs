//! stasis agent runtime
//!
//! Hosts the pure [`stasis_core::ConnectionManager`] on a single actor task
//! and gives the local caller a small, cloneable [`Agent`] handle.
//!
//! # Components
//!
//! - [`agent`]: The facade (`connect`, `disconnect`, `execute_action`,
//!   `is_connected`, `destroy`)
//! - [`runtime`]: The actor that executes manager actions
//! - [`ws`]: WebSocket transport over a pluggable TCP dialer
//! - [`shell`]: Command runner backed by `tokio::process`
//! - [`config`]: Agent configuration and command-line arguments
//! - [`commands`]: Console command parsing for the binary
//! - [`mod@env`]: System clock environment

#![forbid(unsafe_code)]

pub mod agent;
pub mod commands;
pub mod config;
pub mod env;
pub mod error;
pub mod runtime;
pub mod shell;
pub mod ws;

pub use agent::Agent;
pub use commands::ConsoleCommand;
pub use config::{AgentConfig, Args, LogFormat};
pub use env::SystemEnv;
pub use error::{AgentError, CliError};
pub use runtime::Snapshot;
pub use shell::ShellRunner;
pub use ws::{Dialer, TcpDialer, WsSink, WsStream, WsTransport};
