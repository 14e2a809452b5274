//! Status updates for the local caller.

use std::{fmt, time::Duration};

use crate::{DispatchOrigin, PackageAction};

/// Human-readable progress report published to the local caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// A transport open was started
    Connecting {
        /// Server address
        url: String,
    },
    /// The transport opened and the registration frame was queued
    Connected,
    /// The transport failed or closed; a reconnect is scheduled
    Reconnecting {
        /// What went wrong
        reason: String,
        /// Delay until the next attempt
        delay: Duration,
    },
    /// The transport is gone and no reconnect will happen
    Disconnected,
    /// A remote command was refused
    CommandRejected {
        /// Response message sent back
        reason: String,
    },
    /// A package batch finished
    ActionApplied {
        /// Where the action came from
        origin: DispatchOrigin,
        /// What was applied
        action: PackageAction,
        /// Commands that failed
        failed: usize,
        /// Commands issued
        total: usize,
    },
    /// A local action was dropped (wrong key or unknown action)
    LocalActionIgnored {
        /// Why it was dropped
        reason: String,
    },
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { url } => write!(f, "Connecting to {url}"),
            Self::Connected => f.write_str("Connected"),
            Self::Reconnecting { reason, delay } => {
                write!(f, "Connection lost ({reason}); reconnecting in {}s", delay.as_secs())
            },
            Self::Disconnected => f.write_str("Disconnected"),
            Self::CommandRejected { reason } => write!(f, "Rejected remote command: {reason}"),
            Self::ActionApplied { origin, action, failed, total } => {
                let source = match origin {
                    DispatchOrigin::Remote { .. } => "remote",
                    DispatchOrigin::Local => "local",
                };
                write!(f, "Executed {source} {}: {total} package(s)", action.verb())?;
                if *failed > 0 {
                    write!(f, ", {failed} failed")?;
                }
                Ok(())
            },
            Self::LocalActionIgnored { reason } => write!(f, "Local action ignored: {reason}"),
        }
    }
}
