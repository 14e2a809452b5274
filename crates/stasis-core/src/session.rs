//! Session configuration.
//!
//! A session is the active configuration of the agent: where to connect,
//! which shared key authenticates commands, and which managed applications
//! the commands act on. A new `connect` replaces the session wholesale.

use std::{fmt, sync::Arc};

use crate::ConfigError;

/// Identity of a session.
///
/// Every `connect` creates a session with a fresh id. Delayed work (the
/// reconnect timer) records the id it was armed for so that it can tell
/// whether the session it belongs to is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Validated inputs of a `connect` call.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    url: String,
    key: String,
    targets: Vec<String>,
}

impl SessionConfig {
    /// Validate a server address, shared key and ordered target list.
    ///
    /// # Errors
    ///
    /// - `EmptyAddress` if `url` is blank
    /// - `EmptyKey` if `key` is empty
    pub fn new(
        url: impl Into<String>,
        key: impl Into<String>,
        targets: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let url = url.into().trim().to_string();
        let key = key.into();

        if url.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }

        Ok(Self { url, key, targets })
    }

    /// Validate a configuration whose targets come as newline-delimited text.
    pub fn from_package_list(
        url: impl Into<String>,
        key: impl Into<String>,
        package_list: &str,
    ) -> Result<Self, ConfigError> {
        Self::new(url, key, parse_package_list(package_list))
    }

    /// Server address.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Managed application identifiers, in order.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .field("targets", &self.targets)
            .finish()
    }
}

/// The active session, owned by the connection manager.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    url: String,
    key: String,
    targets: Arc<[String]>,
}

impl Session {
    pub(crate) fn new(id: u64, config: SessionConfig) -> Self {
        Self {
            id: SessionId(id),
            url: config.url,
            key: config.key,
            targets: config.targets.into(),
        }
    }

    /// Session identity.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Server address.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Shared key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Immutable snapshot of the managed applications.
    ///
    /// Dispatch takes a clone of this handle so a concurrent `connect` that
    /// replaces the session cannot change a batch that is already running.
    pub fn targets(&self) -> Arc<[String]> {
        Arc::clone(&self.targets)
    }

    /// Exact comparison of a presented key against the shared key.
    pub fn key_matches(&self, presented: &str) -> bool {
        self.key == presented
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .field("targets", &self.targets)
            .finish()
    }
}

/// Parse newline-delimited application identifiers.
///
/// Lines are trimmed and blank lines dropped; order is kept and duplicates
/// are not removed.
pub fn parse_package_list(text: &str) -> Vec<String> {
    text.lines().map(str::trim).filter(|line| !line.is_empty()).map(str::to_string).collect()
}
