//! Command executor.
//!
//! Runs one privileged command through a [`CommandRunner`] and folds its
//! streams into a single result text. The runner is the host's privileged
//! execution channel; it is assumed to be authorised already, so nothing here
//! performs authorisation.
//!
//! Failures never escape as errors: a command that cannot be launched becomes
//! an [`Execution`] carrying an [`ExecError`] and the text
//! `Exception: <message>`.

use std::fmt;

use async_trait::async_trait;

use crate::ExecError;

/// Program and arguments of a command, already split into argv tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Create a command line from a program and its arguments.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Split `line` on whitespace. Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().map(str::to_string);
        let program = tokens.next()?;
        Some(Self { program, args: tokens.collect() })
    }

    /// Program to launch.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Raw result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Exit status; -1 when the process ended without one
    pub exit_code: i32,
}

/// Privileged command-execution channel.
///
/// Implementations block (asynchronously) until the command terminates.
/// There is no caller-side timeout: a command that never exits stalls the
/// dispatch that issued it.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    /// Run `command` to completion.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionFailed` if the command could not be launched or its
    /// output could not be collected.
    async fn run(&self, command: &CommandLine) -> Result<RawOutput, ExecError>;
}

/// Outcome of one executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Command that was run
    pub command: CommandLine,
    /// Combined, trimmed output text
    pub output: String,
    /// Exit status, if the command ran
    pub exit_code: Option<i32>,
    /// Launch failure, if the command did not run
    pub failure: Option<ExecError>,
}

impl Execution {
    /// Whether the command ran and exited with status 0.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.exit_code == Some(0)
    }
}

/// Combine stdout and stderr into one text.
///
/// Stdout lines come first, then stderr lines prefixed with `ERR: `; the
/// result is trimmed.
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    let mut combined = String::with_capacity(stdout.len() + stderr.len());
    for line in stdout.lines() {
        combined.push_str(line);
        combined.push('\n');
    }
    for line in stderr.lines() {
        combined.push_str("ERR: ");
        combined.push_str(line);
        combined.push('\n');
    }
    combined.trim().to_string()
}

/// Runs commands and turns every outcome into an [`Execution`].
#[derive(Debug, Clone)]
pub struct CommandExecutor<R> {
    runner: R,
}

impl<R: CommandRunner> CommandExecutor<R> {
    /// Wrap a runner.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Run `command` and capture its combined output.
    pub async fn execute(&self, command: CommandLine) -> Execution {
        match self.runner.run(&command).await {
            Ok(raw) => {
                let output = combine_output(&raw.stdout, &raw.stderr);
                tracing::debug!(
                    command = %command,
                    exit_code = raw.exit_code,
                    output = %output,
                    "command finished"
                );
                Execution { command, output, exit_code: Some(raw.exit_code), failure: None }
            },
            Err(err) => {
                let message = match &err {
                    ExecError::ExecutionFailed { message, .. } => message.clone(),
                };
                tracing::error!(command = %command, error = %err, "command failed to run");
                Execution {
                    command,
                    output: format!("Exception: {message}"),
                    exit_code: None,
                    failure: Some(err),
                }
            },
        }
    }
}
