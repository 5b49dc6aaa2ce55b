use std::io::Write;

use clap::Args;
use serde::Serialize;

use deckhand::engine::{self, Engine, ExecutionEvent, ExecutionReport, StepStatus, StepUpdate};
use deckhand::plan::{self, DeploymentPlan, PlanRequest};
use deckhand::Error;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct RunArgs {
    pub workload: String,

    pub version: String,

    /// Target namespace (defaults to the version config, then the global default)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Stream step updates to stderr as JSON lines
    #[arg(long)]
    pub events: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    command: String,
    outcome: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    report: ExecutionReport,
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let defaults = super::load_defaults()?;
    let store = global.store(&defaults);

    let plan = plan::build_plan(
        &store,
        &defaults,
        &PlanRequest {
            workload: &args.workload,
            version: &args.version,
            namespace: args.namespace.as_deref(),
        },
    )?;
    let warnings = plan.warnings.clone();

    let engine = Engine::default();
    let report = if args.events {
        run_streaming(engine, plan)?
    } else {
        let total = plan.len();
        engine.execute(&plan, |update| log_update(&update, total))
    };

    let exit_code = if report.has_error { 1 } else { 0 };
    Ok((
        RunOutput {
            command: "run".to_string(),
            outcome: report.outcome().to_string(),
            warnings,
            report,
        },
        exit_code,
    ))
}

fn run_streaming(engine: Engine, plan: DeploymentPlan) -> deckhand::Result<ExecutionReport> {
    let (events, worker) = engine::spawn_plan(engine, plan);

    let stderr = std::io::stderr();
    for event in events {
        let line = serde_json::to_string(&event)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize event".to_string())))?;
        // A closed stderr only loses the feed; the run itself continues.
        let _ = writeln!(stderr.lock(), "{}", line);

        if matches!(event, ExecutionEvent::Finished(_)) {
            break;
        }
    }

    worker
        .join()
        .map_err(|_| Error::internal_unexpected("Execution thread panicked"))
}

fn log_update(update: &StepUpdate, total: usize) {
    match update.status {
        StepStatus::Pending => {}
        StepStatus::Running => {
            deckhand::log_status!("run", "Step {}/{} running", update.index + 1, total);
        }
        StepStatus::Success | StepStatus::Error => {
            deckhand::log_status!("run", "Step {}/{}\n{}", update.index + 1, total, update.output);
        }
    }
}
