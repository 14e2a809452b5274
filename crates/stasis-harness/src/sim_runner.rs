//! Recording command runner.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use stasis_core::{CommandLine, CommandRunner, ExecError, RawOutput};

#[derive(Debug, Default)]
struct RunnerState {
    commands: Vec<String>,
    failing: HashSet<String>,
    unlaunchable: bool,
}

/// Command runner that records every command instead of running it.
///
/// Commands succeed unless one of their arguments was marked failing, in
/// which case they exit with status 1 and a message on stderr. Clones share
/// the same record.
#[derive(Debug, Clone, Default)]
pub struct SimRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl SimRunner {
    /// Create a runner with an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make commands mentioning `package` exit non-zero.
    pub fn fail_for(&self, package: &str) {
        self.lock().failing.insert(package.to_string());
    }

    /// Make every command fail to launch.
    pub fn fail_launch(&self) {
        self.lock().unlaunchable = true;
    }

    /// Commands issued so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Forget recorded commands.
    pub fn clear(&self) {
        self.lock().commands.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CommandRunner for SimRunner {
    async fn run(&self, command: &CommandLine) -> Result<RawOutput, ExecError> {
        let mut state = self.lock();
        state.commands.push(command.to_string());

        if state.unlaunchable {
            return Err(ExecError::ExecutionFailed {
                command: command.to_string(),
                message: format!("Cannot run program \"{}\"", command.program()),
            });
        }

        let failing = command.args().iter().find(|arg| state.failing.contains(*arg));
        Ok(match failing {
            Some(package) => RawOutput {
                stdout: String::new(),
                stderr: format!("Failure: package {package} not found\n"),
                exit_code: 1,
            },
            None => RawOutput::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_fails_on_demand() {
        let runner = SimRunner::new();
        runner.fail_for("com.b");

        let ok = runner.run(&CommandLine::parse("pm suspend com.a").unwrap()).await.unwrap();
        let bad = runner.run(&CommandLine::parse("pm suspend com.b").unwrap()).await.unwrap();

        assert_eq!(ok.exit_code, 0);
        assert_eq!(bad.exit_code, 1);
        assert_eq!(runner.commands(), ["pm suspend com.a", "pm suspend com.b"]);
    }

    #[tokio::test]
    async fn launch_failure() {
        let runner = SimRunner::new();
        runner.fail_launch();

        let result = runner.run(&CommandLine::parse("pm suspend com.a").unwrap()).await;
        assert!(matches!(result, Err(ExecError::ExecutionFailed { .. })));
        assert_eq!(runner.commands().len(), 1);
    }
}
