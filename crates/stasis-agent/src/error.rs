//! Error types for the agent runtime and binary.

use std::{io, path::PathBuf};

use stasis_core::ConfigError;
use thiserror::Error;

/// Errors surfaced by the [`crate::Agent`] facade.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The supplied session configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The agent task is no longer running
    #[error("agent has stopped")]
    Stopped,
}

/// Errors that abort the command-line host.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration flags
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The package list file could not be read
    #[error("failed to read package list {}: {source}", path.display())]
    PackageList {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The logging subscriber could not be installed
    #[error("failed to initialise logging: {0}")]
    Logging(String),

    /// The initial connect was refused
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Reading console input failed
    #[error("console input failed: {0}")]
    Console(#[source] io::Error),
}
