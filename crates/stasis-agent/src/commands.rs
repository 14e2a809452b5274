//! Console command parsing.
//!
//! Parses lines typed on the agent's console into [`ConsoleCommand`] values.

/// Parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Apply an action locally.
    Action {
        /// Wire action name (`start` or `stop`).
        action: &'static str,
        /// Key to present; `None` uses the configured key.
        key: Option<String>,
    },

    /// Reconnect with the configured session.
    Connect,

    /// Disconnect.
    Disconnect,

    /// Report connection state.
    Status,

    /// Destroy the agent and exit.
    Quit,

    /// Blank line.
    Empty,

    /// Unknown command or free text.
    Unknown {
        /// The original input.
        input: String,
    },

    /// Command with invalid arguments.
    InvalidArgs {
        /// Command name.
        command: String,
        /// Error message.
        error: String,
    },
}

/// Parse a console line.
pub fn parse(input: &str) -> ConsoleCommand {
    let input = input.trim();

    if input.is_empty() {
        return ConsoleCommand::Empty;
    }

    let Some(cmd_str) = input.strip_prefix('/') else {
        return ConsoleCommand::Unknown { input: input.to_string() };
    };

    let parts: Vec<&str> = cmd_str.split_whitespace().collect();
    let command = parts.first().copied().unwrap_or("");

    match command {
        "start" | "stop" => {
            let action = if command == "start" { "start" } else { "stop" };
            match parts.as_slice() {
                [_] => ConsoleCommand::Action { action, key: None },
                [_, key] => ConsoleCommand::Action { action, key: Some((*key).to_string()) },
                _ => ConsoleCommand::InvalidArgs {
                    command: command.into(),
                    error: format!("Usage: /{command} [key]"),
                },
            }
        },

        "connect" => ConsoleCommand::Connect,

        "disconnect" => ConsoleCommand::Disconnect,

        "status" => ConsoleCommand::Status,

        "quit" | "q" => ConsoleCommand::Quit,

        _ => ConsoleCommand::Unknown { input: input.to_string() },
    }
}
