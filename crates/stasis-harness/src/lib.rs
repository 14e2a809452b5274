//! Deterministic simulation harness for the stasis agent.
//!
//! In-memory and turmoil-based implementations of the Environment, Transport
//! and CommandRunner seams, so the real agent runtime can be driven under
//! virtual time with a scripted remote controller.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_agent;
pub mod sim_env;
pub mod sim_runner;
pub mod sim_transport;
pub mod turmoil_dialer;

pub use sim_agent::SimAgent;
pub use sim_env::SimEnv;
pub use sim_runner::SimRunner;
pub use sim_transport::{SimPeer, SimServer, SimTransport};
pub use turmoil_dialer::TurmoilDialer;
