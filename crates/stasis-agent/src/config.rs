//! Agent configuration.

use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use stasis_core::{CommandTemplates, ConfigError, FailurePolicy, ManagerConfig};

/// Server address used when none is configured.
pub const DEFAULT_SERVER_URL: &str = "ws://192.168.1.100:8080";

/// Runtime configuration for an [`crate::Agent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Reconnect delay and heartbeat
    pub manager: ManagerConfig,
    /// Suspend/unsuspend command templates
    pub templates: CommandTemplates,
    /// How command failures are reported
    pub policy: FailurePolicy,
    /// How often the manager's clock-driven checks run
    pub tick_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            templates: CommandTemplates::default(),
            policy: FailurePolicy::default(),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Remote suspension agent.
///
/// Connects to a controller over WebSocket and suspends or resumes the
/// listed packages on command.
#[derive(Debug, Parser)]
#[command(name = "stasis-agent", version, about)]
pub struct Args {
    /// Controller address (ws:// or wss://)
    #[arg(long, env = "STASIS_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// Shared key used to register and to authenticate commands
    #[arg(long, env = "STASIS_KEY", hide_env_values = true)]
    pub key: String,

    /// File with one package identifier per line
    #[arg(long)]
    pub packages_file: Option<PathBuf>,

    /// Package identifier to manage (repeatable)
    #[arg(long = "package", value_name = "ID")]
    pub packages: Vec<String>,

    /// Command used to suspend a package
    #[arg(long, default_value = "pm suspend {package}")]
    pub suspend_command: String,

    /// Command used to resume a package
    #[arg(long, default_value = "pm unsuspend {package}")]
    pub unsuspend_command: String,

    /// Prefix prepended to every command (e.g. "sudo -n")
    #[arg(long, default_value = "")]
    pub privilege_prefix: String,

    /// Seconds to wait before reconnecting
    #[arg(long, default_value_t = 5)]
    pub reconnect_delay_secs: u64,

    /// Keepalive interval in seconds (0 disables)
    #[arg(long, default_value_t = 30)]
    pub heartbeat_secs: u64,

    /// Answer with an error when any package command fails
    #[arg(long)]
    pub strict: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Args {
    /// Build the runtime configuration from the flags.
    pub fn agent_config(&self) -> Result<AgentConfig, ConfigError> {
        let templates = CommandTemplates::new(
            &self.suspend_command,
            &self.unsuspend_command,
            &self.privilege_prefix,
        )?;

        let heartbeat_interval =
            (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs));

        Ok(AgentConfig {
            manager: ManagerConfig {
                reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
                heartbeat_interval,
            },
            templates,
            policy: if self.strict { FailurePolicy::Strict } else { FailurePolicy::BestEffort },
            ..AgentConfig::default()
        })
    }

    /// Newline-delimited package list from `--package` flags, followed by
    /// the contents of `--packages-file` if one was read.
    pub fn package_list(&self, file_contents: Option<&str>) -> String {
        let mut list = self.packages.join("\n");
        if let Some(contents) = file_contents {
            if !list.is_empty() {
                list.push('\n');
            }
            list.push_str(contents);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use stasis_core::{PackageAction, parse_package_list};

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("stasis-agent").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_agent_config() {
        let args = parse(&["--key", "k1", "--server-url", "ws://10.0.0.1:8080"]);
        let config = args.agent_config().unwrap();
        let default = AgentConfig::default();

        assert_eq!(config.manager.reconnect_delay, default.manager.reconnect_delay);
        assert_eq!(config.manager.heartbeat_interval, default.manager.heartbeat_interval);
        assert_eq!(config.templates, default.templates);
        assert_eq!(config.policy, FailurePolicy::BestEffort);
        assert_eq!(args.log_format, LogFormat::Pretty);
    }

    #[test]
    fn zero_heartbeat_disables_it() {
        let args = parse(&["--key", "k1", "--heartbeat-secs", "0", "--strict"]);
        let config = args.agent_config().unwrap();

        assert_eq!(config.manager.heartbeat_interval, None);
        assert_eq!(config.policy, FailurePolicy::Strict);
    }

    #[test]
    fn custom_templates_and_prefix() {
        let args = parse(&[
            "--key",
            "k1",
            "--suspend-command",
            "cmd package suspend {package}",
            "--privilege-prefix",
            "su -c",
        ]);
        let config = args.agent_config().unwrap();
        let cmd = config.templates.command_for(PackageAction::Suspend, "com.a");
        assert_eq!(cmd.to_string(), "su -c cmd package suspend com.a");
    }

    #[test]
    fn blank_template_is_a_config_error() {
        let args = parse(&["--key", "k1", "--unsuspend-command", "  "]);
        assert_eq!(
            args.agent_config().unwrap_err(),
            ConfigError::EmptyTemplate { action: "unsuspend" }
        );
    }

    #[test]
    fn package_flags_come_before_file_contents() {
        let args = parse(&["--key", "k1", "--package", "com.a", "--package", "com.b"]);
        let list = args.package_list(Some("\ncom.c\n\n"));
        assert_eq!(parse_package_list(&list), ["com.a", "com.b", "com.c"]);

        assert_eq!(parse_package_list(&args.package_list(None)), ["com.a", "com.b"]);
    }
}
