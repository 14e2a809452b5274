//! Package controller.
//!
//! Translates a logical action into one privileged command per managed
//! application and runs them in listed order. The batch is best-effort: a
//! failing command never stops the remaining ones, since suspending an
//! already-suspended or missing application legitimately fails.

use stasis_proto::Response;

use crate::{CommandExecutor, CommandLine, CommandRunner, ConfigError, Execution};

/// Placeholder replaced by the application identifier in command templates.
pub const PACKAGE_PLACEHOLDER: &str = "{package}";

/// Logical action applied to every managed application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageAction {
    /// Suspend the applications (wire action `stop`)
    Suspend,
    /// Resume the applications (wire action `start`)
    Unsuspend,
}

impl PackageAction {
    /// Map a wire action name. Anything other than `start`/`stop` is `None`.
    pub fn from_wire(action: &str) -> Option<Self> {
        match action {
            "start" => Some(Self::Unsuspend),
            "stop" => Some(Self::Suspend),
            _ => None,
        }
    }

    /// Verb used in messages and template names.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Suspend => "suspend",
            Self::Unsuspend => "unsuspend",
        }
    }

    /// Response message for a successful batch.
    pub fn success_message(self) -> &'static str {
        match self {
            Self::Suspend => "Packages suspended",
            Self::Unsuspend => "Packages unsuspended",
        }
    }
}

/// Command templates for each action.
///
/// Templates are split on whitespace into argv tokens and `{package}` is
/// substituted inside each token, so an identifier can never add arguments.
/// A template without the placeholder gets the identifier appended as the
/// last argument. The privilege prefix is prepended to every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplates {
    suspend: Vec<String>,
    unsuspend: Vec<String>,
    privilege_prefix: Vec<String>,
}

impl CommandTemplates {
    /// Build templates from command strings and a privilege prefix.
    ///
    /// # Errors
    ///
    /// Returns `EmptyTemplate` if either command template is blank.
    pub fn new(suspend: &str, unsuspend: &str, privilege_prefix: &str) -> Result<Self, ConfigError> {
        let suspend = tokens(suspend);
        if suspend.is_empty() {
            return Err(ConfigError::EmptyTemplate { action: PackageAction::Suspend.verb() });
        }
        let unsuspend = tokens(unsuspend);
        if unsuspend.is_empty() {
            return Err(ConfigError::EmptyTemplate { action: PackageAction::Unsuspend.verb() });
        }

        Ok(Self { suspend, unsuspend, privilege_prefix: tokens(privilege_prefix) })
    }

    /// Command line for applying `action` to `package`.
    pub fn command_for(&self, action: PackageAction, package: &str) -> CommandLine {
        let template = match action {
            PackageAction::Suspend => &self.suspend,
            PackageAction::Unsuspend => &self.unsuspend,
        };

        let mut argv: Vec<String> = self.privilege_prefix.clone();
        let mut substituted = false;
        for token in template {
            if token.contains(PACKAGE_PLACEHOLDER) {
                substituted = true;
                argv.push(token.replace(PACKAGE_PLACEHOLDER, package));
            } else {
                argv.push(token.clone());
            }
        }
        if !substituted {
            argv.push(package.to_string());
        }

        let mut argv = argv.into_iter();
        let program = argv.next().unwrap_or_default();
        CommandLine::new(program, argv.collect())
    }
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            suspend: tokens("pm suspend {package}"),
            unsuspend: tokens("pm unsuspend {package}"),
            privilege_prefix: Vec::new(),
        }
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// How per-application command failures affect the reported outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Always report success; failures are only logged
    #[default]
    BestEffort,
    /// Report an error if any command failed (all commands still run)
    Strict,
}

/// Result of applying an action to a batch of applications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Action that was applied
    pub action: PackageAction,
    /// One execution per target, in order
    pub executions: Vec<Execution>,
    /// Policy in force for this batch
    pub policy: FailurePolicy,
}

impl ApplyReport {
    /// Number of commands issued.
    pub fn total(&self) -> usize {
        self.executions.len()
    }

    /// Number of commands that failed to launch or exited non-zero.
    pub fn failed(&self) -> usize {
        self.executions.iter().filter(|e| !e.succeeded()).count()
    }

    /// Whether the batch counts as successful under its policy.
    pub fn is_success(&self) -> bool {
        match self.policy {
            FailurePolicy::BestEffort => true,
            FailurePolicy::Strict => self.failed() == 0,
        }
    }

    /// Response reported to the remote controller.
    pub fn response(&self) -> Response {
        if self.is_success() {
            Response::success(self.action.success_message())
        } else {
            Response::error(format!(
                "Failed to {} {} of {} packages",
                self.action.verb(),
                self.failed(),
                self.total()
            ))
        }
    }
}

/// Applies suspend/unsuspend actions to managed applications.
///
/// Stateless apart from its configuration; safe to call from whichever task
/// dispatches the action.
#[derive(Debug, Clone)]
pub struct PackageController<R> {
    executor: CommandExecutor<R>,
    templates: CommandTemplates,
    policy: FailurePolicy,
}

impl<R: CommandRunner> PackageController<R> {
    /// Create a controller.
    pub fn new(runner: R, templates: CommandTemplates, policy: FailurePolicy) -> Self {
        Self { executor: CommandExecutor::new(runner), templates, policy }
    }

    /// The command executor.
    pub fn executor(&self) -> &CommandExecutor<R> {
        &self.executor
    }

    /// Apply `action` to each of `targets`, in order.
    ///
    /// An empty target list issues nothing and still reports success.
    pub async fn apply(&self, action: PackageAction, targets: &[String]) -> ApplyReport {
        if targets.is_empty() {
            tracing::warn!(action = action.verb(), "no packages to {}", action.verb());
        }

        let mut executions = Vec::with_capacity(targets.len());
        for package in targets {
            let command = self.templates.command_for(action, package);
            let execution = self.executor.execute(command).await;
            if !execution.succeeded() {
                tracing::warn!(
                    package = %package,
                    action = action.verb(),
                    exit_code = ?execution.exit_code,
                    output = %execution.output,
                    "package command failed"
                );
            }
            executions.push(execution);
        }

        let report = ApplyReport { action, executions, policy: self.policy };
        tracing::info!(
            action = action.verb(),
            total = report.total(),
            failed = report.failed(),
            "package batch applied"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, PoisonError};

    use async_trait::async_trait;

    use super::*;
    use crate::{ExecError, RawOutput};

    #[derive(Clone, Default)]
    struct Recorder {
        commands: Arc<Mutex<Vec<String>>>,
        failing: Vec<String>,
    }

    impl Recorder {
        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, command: &CommandLine) -> Result<RawOutput, ExecError> {
            self.commands.lock().unwrap_or_else(PoisonError::into_inner).push(command.to_string());
            let failing = command.args().iter().any(|arg| self.failing.contains(arg));
            Ok(RawOutput { exit_code: i32::from(failing), ..RawOutput::default() })
        }
    }

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn wire_actions() {
        assert_eq!(PackageAction::from_wire("start"), Some(PackageAction::Unsuspend));
        assert_eq!(PackageAction::from_wire("stop"), Some(PackageAction::Suspend));
        assert_eq!(PackageAction::from_wire("STOP"), None);
        assert_eq!(PackageAction::from_wire(""), None);
    }

    #[test]
    fn default_templates() {
        let templates = CommandTemplates::default();
        let cmd = templates.command_for(PackageAction::Suspend, "com.a");
        assert_eq!(cmd.to_string(), "pm suspend com.a");
        let cmd = templates.command_for(PackageAction::Unsuspend, "com.a");
        assert_eq!(cmd.to_string(), "pm unsuspend com.a");
    }

    #[test]
    fn privilege_prefix_is_prepended() {
        let templates =
            CommandTemplates::new("pm suspend {package}", "pm unsuspend {package}", "sudo -n")
                .unwrap();
        let cmd = templates.command_for(PackageAction::Suspend, "com.a");
        assert_eq!(cmd.program(), "sudo");
        assert_eq!(cmd.args(), ["-n", "pm", "suspend", "com.a"]);
    }

    #[test]
    fn package_cannot_inject_arguments() {
        let templates = CommandTemplates::default();
        let cmd = templates.command_for(PackageAction::Suspend, "com.a --user 0");
        assert_eq!(cmd.args(), ["suspend", "com.a --user 0"]);
    }

    #[test]
    fn template_without_placeholder_appends_package() {
        let templates = CommandTemplates::new("freeze", "thaw --now", "").unwrap();
        assert_eq!(templates.command_for(PackageAction::Suspend, "app").to_string(), "freeze app");
        assert_eq!(
            templates.command_for(PackageAction::Unsuspend, "app").to_string(),
            "thaw --now app"
        );
    }

    #[test]
    fn blank_template_is_rejected() {
        assert_eq!(
            CommandTemplates::new(" ", "pm unsuspend", ""),
            Err(ConfigError::EmptyTemplate { action: "suspend" })
        );
        assert_eq!(
            CommandTemplates::new("pm suspend", "", ""),
            Err(ConfigError::EmptyTemplate { action: "unsuspend" })
        );
    }

    #[tokio::test]
    async fn stop_suspends_every_target_in_order() {
        let recorder = Recorder::default();
        let controller = PackageController::new(
            recorder.clone(),
            CommandTemplates::default(),
            FailurePolicy::BestEffort,
        );

        let report = controller.apply(PackageAction::Suspend, &targets(&["com.a", "com.b"])).await;

        assert_eq!(recorder.commands(), ["pm suspend com.a", "pm suspend com.b"]);
        assert_eq!(report.response(), Response::success("Packages suspended"));
    }

    #[tokio::test]
    async fn empty_targets_still_succeed() {
        let recorder = Recorder::default();
        let controller = PackageController::new(
            recorder.clone(),
            CommandTemplates::default(),
            FailurePolicy::Strict,
        );

        let report = controller.apply(PackageAction::Unsuspend, &[]).await;

        assert!(recorder.commands().is_empty());
        assert_eq!(report.total(), 0);
        assert_eq!(report.response(), Response::success("Packages unsuspended"));
    }

    #[tokio::test]
    async fn best_effort_ignores_failures() {
        let recorder = Recorder { failing: vec!["com.a".into()], ..Recorder::default() };
        let controller = PackageController::new(
            recorder.clone(),
            CommandTemplates::default(),
            FailurePolicy::BestEffort,
        );

        let report = controller.apply(PackageAction::Suspend, &targets(&["com.a", "com.b"])).await;

        assert_eq!(recorder.commands().len(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.response().is_success());
    }

    #[tokio::test]
    async fn strict_reports_failures_after_running_all() {
        let recorder = Recorder { failing: vec!["com.a".into()], ..Recorder::default() };
        let controller = PackageController::new(
            recorder.clone(),
            CommandTemplates::default(),
            FailurePolicy::Strict,
        );

        let report = controller.apply(PackageAction::Suspend, &targets(&["com.a", "com.b"])).await;

        assert_eq!(recorder.commands().len(), 2);
        assert_eq!(report.response(), Response::error("Failed to suspend 1 of 2 packages"));
    }
}
