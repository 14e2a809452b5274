//! Command runner backed by child processes.

use async_trait::async_trait;
use stasis_core::{CommandLine, CommandRunner, ExecError, RawOutput};
use tokio::process::Command;

/// Runs commands as child processes and waits for them to exit.
///
/// Privilege comes from the configured prefix (e.g. `sudo -n` or `su -c`);
/// the runner itself launches exactly the argv it is given, without a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &CommandLine) -> Result<RawOutput, ExecError> {
        let output = Command::new(command.program())
            .args(command.args())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| ExecError::ExecutionFailed {
                command: command.to_string(),
                message: err.to_string(),
            })?;

        Ok(RawOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use stasis_core::CommandExecutor;

    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let command =
            CommandLine::new("sh", vec!["-c".into(), "echo out; echo bad >&2; exit 3".into()]);

        let execution = CommandExecutor::new(ShellRunner).execute(command).await;
        assert_eq!(execution.exit_code, Some(3));
        assert_eq!(execution.output, "out\nERR: bad");
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_failure() {
        let command = CommandLine::parse("/definitely/not/a/program --flag").unwrap();
        let execution = CommandExecutor::new(ShellRunner).execute(command).await;

        assert!(execution.failure.is_some());
        assert!(execution.output.starts_with("Exception: "));
    }
}
