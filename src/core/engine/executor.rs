//! Sequential plan execution.
//!
//! Every step moves Pending -> Running -> Success | Error exactly once and a
//! failing step never stops the run. Each transition is reported through a
//! callback (or, with [`spawn_plan`], a channel whose last message is the
//! finished [`ExecutionReport`]).

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::format::{format_output, FailureKind, StepFailure, FAILED_GLYPH};
use crate::error::{Error, ExecutionFailedDetails, Result};
use crate::plan::DeploymentPlan;
use crate::utils::command::{run_limited, CapturedOutput, LimitedOutput, RunLimits, Termination};
use crate::utils::shell;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub fn default_limits() -> RunLimits {
    RunLimits {
        timeout: STEP_TIMEOUT,
        max_output_bytes: MAX_OUTPUT_BYTES,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub status: StepStatus,
    pub stdout: String,
    pub stderr: String,
    pub formatted_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
}

impl CommandResult {
    fn settled(
        output: CapturedOutput,
        failure: Option<StepFailure>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let formatted = format_output(&output.stdout, &output.stderr);
        let (status, formatted_output) = match &failure {
            None => (StepStatus::Success, formatted),
            Some(failure) if formatted.is_empty() => (
                StepStatus::Error,
                format!("{} {}", FAILED_GLYPH, failure.message),
            ),
            Some(failure) => (
                StepStatus::Error,
                format!("{} {}\n{}", FAILED_GLYPH, failure.message, formatted),
            ),
        };

        Self {
            status,
            stdout: output.stdout,
            stderr: output.stderr,
            formatted_output,
            started_at: Some(started_at),
            ended_at: Some(ended_at),
            failure,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }
}

/// One status transition of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepUpdate {
    pub index: usize,
    pub status: StepStatus,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepUpdate {
    fn pending(index: usize) -> Self {
        Self {
            index,
            status: StepStatus::Pending,
            output: String::new(),
            started_at: None,
            ended_at: None,
        }
    }

    fn running(index: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            index,
            status: StepStatus::Running,
            output: String::new(),
            started_at: Some(started_at),
            ended_at: None,
        }
    }

    fn finished(index: usize, result: &CommandResult) -> Self {
        Self {
            index,
            status: result.status,
            output: result.formatted_output.clone(),
            started_at: result.started_at,
            ended_at: result.ended_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Results aligned 1:1 with the plan's steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub workload: String,
    pub version: String,
    pub namespace: String,
    pub results: Vec<CommandResult>,
    pub has_error: bool,
    pub summary: ExecutionSummary,
}

impl ExecutionReport {
    fn new(run_id: Uuid, plan: &DeploymentPlan, results: Vec<CommandResult>) -> Self {
        let failed = results.iter().filter(|r| r.is_error()).count();
        let summary = ExecutionSummary {
            total: results.len(),
            succeeded: results.len() - failed,
            failed,
        };

        Self {
            run_id,
            workload: plan.workload.clone(),
            version: plan.version.clone(),
            namespace: plan.namespace.namespace.clone(),
            has_error: failed > 0,
            results,
            summary,
        }
    }

    pub fn outcome(&self) -> &'static str {
        if self.has_error {
            "completed with errors"
        } else {
            "completed"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Step(StepUpdate),
    Finished(ExecutionReport),
}

/// Starts one process for an argv and waits for it under the given limits.
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[String], limits: RunLimits) -> Result<LimitedOutput>;
}

/// Runs argv directly as a child process, without a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, argv: &[String], limits: RunLimits) -> Result<LimitedOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::command_rejected("", "Command is empty"))?;
        run_limited(program, args, limits)
    }
}

/// Successful ad-hoc command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub success: bool,
    pub output: String,
}

#[derive(Clone)]
pub struct Engine {
    runner: Arc<dyn CommandRunner>,
    limits: RunLimits,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(ProcessRunner))
    }
}

impl Engine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            limits: default_limits(),
        }
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> RunLimits {
        self.limits
    }

    pub fn execute_step(&self, argv: &[String]) -> CommandResult {
        self.run_step(argv, Utc::now())
    }

    fn run_step(&self, argv: &[String], started_at: DateTime<Utc>) -> CommandResult {
        let outcome = if argv.is_empty() {
            Err(Error::command_rejected("", "Command is empty"))
        } else {
            self.runner.run(argv, self.limits)
        };
        let (output, failure) = settle(outcome, self.limits);
        CommandResult::settled(output, failure, started_at, Utc::now())
    }

    /// Run every step in order and report each transition to `on_update`.
    pub fn execute(
        &self,
        plan: &DeploymentPlan,
        mut on_update: impl FnMut(StepUpdate),
    ) -> ExecutionReport {
        let run_id = Uuid::new_v4();
        tracing::info!(
            %run_id,
            workload = %plan.workload,
            version = %plan.version,
            steps = plan.steps.len(),
            "execution started"
        );

        for index in 0..plan.steps.len() {
            on_update(StepUpdate::pending(index));
        }

        let results: Vec<CommandResult> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let started_at = Utc::now();
                on_update(StepUpdate::running(index, started_at));

                let result = self.run_step(&step.command.argv, started_at);
                let duration_ms = result
                    .ended_at
                    .map(|ended| (ended - started_at).num_milliseconds())
                    .unwrap_or_default();
                match &result.failure {
                    None => tracing::info!(
                        %run_id,
                        index,
                        artifact = %step.artifact.file_name,
                        duration_ms,
                        "step succeeded"
                    ),
                    Some(failure) => tracing::warn!(
                        %run_id,
                        index,
                        artifact = %step.artifact.file_name,
                        kind = ?failure.kind,
                        duration_ms,
                        "step failed"
                    ),
                }

                on_update(StepUpdate::finished(index, &result));
                result
            })
            .collect();

        let report = ExecutionReport::new(run_id, plan, results);
        tracing::info!(
            %run_id,
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            "execution {}",
            report.outcome()
        );
        report
    }

    /// Validate and run one ad-hoc command under the step limits.
    pub fn execute_command(&self, command: &str, allowed: &[Vec<String>]) -> Result<ExecOutput> {
        let argv = validate_command(command, allowed)?;
        let result = self.execute_step(&argv);
        match result.failure {
            None => Ok(ExecOutput {
                success: true,
                output: result.formatted_output,
            }),
            Some(failure) => Err(Error::execution_failed(
                failure.kind.error_code(),
                failure.message,
                ExecutionFailedDetails {
                    command: command.trim().to_string(),
                    exit_code: failure.exit_code,
                    raw: failure.raw,
                },
            )),
        }
    }
}

fn settle(outcome: Result<LimitedOutput>, limits: RunLimits) -> (CapturedOutput, Option<StepFailure>) {
    let limited = match outcome {
        Ok(limited) => limited,
        Err(err) => {
            // Spawn errors carry the OS message in details.
            let raw = err
                .details
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or(err.message);
            return (CapturedOutput::default(), Some(StepFailure::classified(raw, None)));
        }
    };

    let failure = match limited.termination {
        Termination::Exited(Some(0)) => None,
        Termination::Exited(code) => {
            let text = limited.output.error_text();
            let raw = if !text.is_empty() {
                text
            } else {
                match code {
                    Some(code) => format!("Process exited with code {}", code),
                    None => "Process terminated by signal".to_string(),
                }
            };
            Some(StepFailure::classified(raw, code))
        }
        Termination::TimedOut => Some(StepFailure::new(
            FailureKind::CommandTimeout,
            format!("Exceeded {}s timeout", limits.timeout.as_secs_f64()),
            None,
        )),
        Termination::OutputLimitExceeded => Some(StepFailure::new(
            FailureKind::GenericExecutionFailure,
            format!("Output exceeded {} bytes", limits.max_output_bytes),
            None,
        )),
    };

    (limited.output, failure)
}

/// Non-empty, no shell operators, program on the allow-list.
pub fn validate_command(command: &str, allowed: &[Vec<String>]) -> Result<Vec<String>> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(Error::command_rejected(command, "Command is empty"));
    }
    if let Some(operator) = shell::find_shell_operator(trimmed) {
        return Err(Error::command_rejected(
            trimmed,
            format!("Shell operator '{}' is not allowed", operator),
        ));
    }

    let argv = shell::split_args(trimmed)?;
    if !allowed.iter().any(|prefix| !prefix.is_empty() && argv.starts_with(prefix)) {
        let program = argv.first().map(String::as_str).unwrap_or_default();
        let accepted: Vec<String> = allowed.iter().map(|prefix| prefix.join(" ")).collect();
        return Err(Error::command_rejected(
            trimmed,
            format!("Program '{}' is not allowed", program),
        )
        .with_hint(format!("Commands must start with one of: {}", accepted.join(", "))));
    }

    Ok(argv)
}

/// Run a plan on its own thread. Step updates arrive on the receiver,
/// followed by exactly one `Finished` event. Dropping the receiver does not
/// stop the run.
pub fn spawn_plan(
    engine: Engine,
    plan: DeploymentPlan,
) -> (Receiver<ExecutionEvent>, JoinHandle<ExecutionReport>) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let report = engine.execute(&plan, |update| {
            let _ = tx.send(ExecutionEvent::Step(update));
        });
        let _ = tx.send(ExecutionEvent::Finished(report.clone()));
        report
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, ArtifactType, SourceDir};
    use crate::error::ErrorCode;
    use crate::plan::{NamespaceSource, PlanStep, ResolvedNamespace};
    use crate::synthesize::Command;
    use std::sync::Mutex;

    /// Replays canned outcomes keyed by the argv's last element.
    struct ScriptedRunner {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, argv: &[String], _limits: RunLimits) -> Result<LimitedOutput> {
            self.calls.lock().unwrap().push(argv.to_vec());
            let script = argv.last().cloned().unwrap_or_default();
            let (stdout, stderr, termination) = match script.as_str() {
                "ok" => ("configmap/app created\n", "", Termination::Exited(Some(0))),
                "missing" => ("", "Error: secrets \"db\" not found\n", Termination::Exited(Some(1))),
                "slow" => ("", "", Termination::TimedOut),
                "noisy" => ("x", "", Termination::OutputLimitExceeded),
                "spawn" => return Err(Error::internal_io("Failed to run kubectl: Permission denied (os error 13)", None)),
                _ => ("", "", Termination::Exited(Some(2))),
            };
            Ok(LimitedOutput {
                output: CapturedOutput::new(stdout.to_string(), stderr.to_string()),
                termination,
            })
        }
    }

    fn plan_of(scripts: &[&str]) -> DeploymentPlan {
        let steps = scripts
            .iter()
            .enumerate()
            .map(|(i, script)| {
                let file_name = format!("myapp-1.0.0-{}-configmap.yaml", i);
                PlanStep {
                    artifact: Artifact {
                        artifact_type: ArtifactType::ConfigMap,
                        file_name: file_name.clone(),
                        relative_path: format!("myapp/deploy-scripts/{}", file_name),
                        source: SourceDir::Scripts,
                        is_final_in_root: false,
                        namespace: "team-a".to_string(),
                    },
                    command: Command::from_argv(
                        vec!["kubectl".to_string(), script.to_string()],
                        ArtifactType::ConfigMap,
                        "team-a",
                        &file_name,
                        false,
                    ),
                }
            })
            .collect();

        DeploymentPlan {
            workload: "myapp".to_string(),
            version: "1.0.0".to_string(),
            namespace: ResolvedNamespace {
                namespace: "team-a".to_string(),
                source: NamespaceSource::Explicit,
            },
            steps,
            warnings: Vec::new(),
        }
    }

    fn scripted() -> (Arc<ScriptedRunner>, Engine) {
        let runner = Arc::new(ScriptedRunner::new());
        let engine = Engine::new(runner.clone());
        (runner, engine)
    }

    #[test]
    fn failing_step_does_not_stop_the_run() {
        let (runner, engine) = scripted();
        let report = engine.execute(&plan_of(&["ok", "missing", "ok"]), |_| {});

        let statuses: Vec<StepStatus> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Success, StepStatus::Error, StepStatus::Success]
        );
        assert!(report.has_error);
        assert_eq!(report.outcome(), "completed with errors");
        assert_eq!(
            report.summary,
            ExecutionSummary {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(runner.calls.lock().unwrap().len(), 3);

        let failure = report.results[1].failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::ResourceMissing);
        assert_eq!(failure.exit_code, Some(1));
        assert!(report.results[1].formatted_output.starts_with("❌ Resource not found"));
    }

    #[test]
    fn every_step_transitions_once_through_each_state() {
        let (_runner, engine) = scripted();
        let mut updates = Vec::new();
        let report = engine.execute(&plan_of(&["ok", "missing"]), |u| updates.push(u));

        let trail: Vec<(usize, StepStatus)> = updates.iter().map(|u| (u.index, u.status)).collect();
        assert_eq!(
            trail,
            vec![
                (0, StepStatus::Pending),
                (1, StepStatus::Pending),
                (0, StepStatus::Running),
                (0, StepStatus::Success),
                (1, StepStatus::Running),
                (1, StepStatus::Error),
            ]
        );

        let last = updates.last().unwrap();
        assert_eq!(last.output, report.results[1].formatted_output);
        assert!(last.started_at.unwrap() <= last.ended_at.unwrap());
        assert_eq!(updates[2].started_at, report.results[0].started_at);
    }

    #[test]
    fn success_output_is_formatted() {
        let (_runner, engine) = scripted();
        let report = engine.execute(&plan_of(&["ok"]), |_| {});
        assert!(!report.has_error);
        assert_eq!(report.outcome(), "completed");
        assert_eq!(report.results[0].formatted_output, "✅ configmap/app created");
        assert_eq!(report.results[0].stdout, "configmap/app created\n");
    }

    #[test]
    fn limits_and_spawn_errors_are_classified() {
        let (_runner, engine) = scripted();
        let report = engine.execute(&plan_of(&["slow", "noisy", "spawn", "other"]), |_| {});
        let kinds: Vec<FailureKind> = report
            .results
            .iter()
            .map(|r| r.failure.as_ref().unwrap().kind)
            .collect();

        assert_eq!(
            kinds,
            vec![
                FailureKind::CommandTimeout,
                FailureKind::GenericExecutionFailure,
                FailureKind::PermissionDenied,
                FailureKind::GenericExecutionFailure,
            ]
        );
        assert!(report.results[1]
            .failure
            .as_ref()
            .unwrap()
            .message
            .contains("Output exceeded 1048576 bytes"));
        assert_eq!(
            report.results[3].failure.as_ref().unwrap().raw,
            "Process exited with code 2"
        );
    }

    #[test]
    fn empty_plan_reports_no_error() {
        let (_runner, engine) = scripted();
        let report = engine.execute(&plan_of(&[]), |_| {});
        assert!(report.results.is_empty());
        assert!(!report.has_error);
    }

    #[test]
    fn spawned_plan_ends_with_report() {
        let (_runner, engine) = scripted();
        let (rx, handle) = spawn_plan(engine, plan_of(&["ok", "missing"]));

        let events: Vec<ExecutionEvent> = rx.iter().collect();
        let report = handle.join().unwrap();

        assert_eq!(events.len(), 2 + 2 * 2 + 1);
        match events.last().unwrap() {
            ExecutionEvent::Finished(finished) => assert_eq!(finished, &report),
            other => panic!("unexpected terminal event: {:?}", other),
        }
        assert!(events[..events.len() - 1]
            .iter()
            .all(|e| matches!(e, ExecutionEvent::Step(_))));
    }

    #[test]
    fn real_processes_run_without_shell() {
        let engine = Engine::default();
        let ok = engine.execute_step(&["true".to_string()]);
        assert_eq!(ok.status, StepStatus::Success);

        let failed = engine.execute_step(&["false".to_string()]);
        assert_eq!(failed.status, StepStatus::Error);
        assert_eq!(failed.failure.unwrap().exit_code, Some(1));
    }

    #[test]
    fn real_timeout_marks_step_as_timed_out() {
        let engine = Engine::default().with_limits(RunLimits {
            timeout: Duration::from_millis(200),
            max_output_bytes: 1024,
        });
        let result = engine.execute_step(&["sleep".to_string(), "5".to_string()]);
        assert_eq!(result.failure.unwrap().kind, FailureKind::CommandTimeout);
    }

    #[test]
    fn ad_hoc_commands_are_validated() {
        let allowed = vec![vec!["kubectl".to_string()], vec!["helm".to_string()]];

        let argv = validate_command("kubectl get pods --namespace 'team a'", &allowed).unwrap();
        assert_eq!(argv, vec!["kubectl", "get", "pods", "--namespace", "team a"]);

        for rejected in ["", "   ", "kubectl get pods | grep web", "rm -rf /", "kubectl get pods; ls"] {
            let err = validate_command(rejected, &allowed).unwrap_err();
            assert_eq!(err.code, ErrorCode::CommandRejected, "{:?}", rejected);
        }
    }

    #[test]
    fn wrapped_commands_need_the_whole_wrapper_prefix() {
        let allowed: Vec<Vec<String>> = [
            ["docker", "exec", "k8s-tools", "kubectl"],
            ["docker", "exec", "k8s-tools", "helm"],
        ]
        .iter()
        .map(|prefix| prefix.iter().map(|s| s.to_string()).collect())
        .collect();

        assert!(validate_command("docker exec k8s-tools kubectl get pods", &allowed).is_ok());
        assert!(validate_command("docker exec k8s-tools helm list", &allowed).is_ok());

        for rejected in [
            "docker run --rm alpine",
            "docker exec k8s-tools sh",
            "docker exec other kubectl get pods",
            "kubectl get pods",
        ] {
            let err = validate_command(rejected, &allowed).unwrap_err();
            assert_eq!(err.code, ErrorCode::CommandRejected, "{:?}", rejected);
        }
    }

    #[test]
    fn ad_hoc_command_failure_maps_to_error_code() {
        let (_runner, engine) = scripted();
        let allowed = vec![vec!["kubectl".to_string()]];

        let ok = engine.execute_command("kubectl ok", &allowed).unwrap();
        assert!(ok.success);
        assert_eq!(ok.output, "✅ configmap/app created");

        let err = engine.execute_command("kubectl missing", &allowed).unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceMissing);
        assert_eq!(err.details["exitCode"], 1);

        let err = engine.execute_command("kubectl slow", &allowed).unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandTimeout);
        assert_eq!(err.retryable, Some(true));
    }
}
