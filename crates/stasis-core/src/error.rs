//! Error types.

use thiserror::Error;

/// Invalid session configuration supplied to `connect`.
///
/// Surfaced to the caller; the current session is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Server address is empty
    #[error("server address is empty")]
    EmptyAddress,

    /// Shared key is empty
    #[error("shared key is empty")]
    EmptyKey,

    /// A suspend/unsuspend command template has no tokens
    #[error("{action} command template is empty")]
    EmptyTemplate {
        /// Which template was empty
        action: &'static str,
    },
}

/// Failure of the message transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The address could not be parsed or uses an unsupported scheme
    #[error("invalid address {url}: {reason}")]
    InvalidAddress {
        /// Address as supplied
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Establishing the connection failed
    #[error("connect failed: {0}")]
    Connect(String),

    /// Sending a frame failed
    #[error("send failed: {0}")]
    Send(String),

    /// The connection is already closed
    #[error("connection closed")]
    Closed,

    /// The connection broke without a close handshake
    #[error("connection reset: {0}")]
    Reset(String),

    /// An operation exceeded its time bound
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Failure to launch or inspect a privileged command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The command could not be started or its output could not be read
    #[error("failed to execute `{command}`: {message}")]
    ExecutionFailed {
        /// Command line that was attempted
        command: String,
        /// Underlying failure message
        message: String,
    },
}
