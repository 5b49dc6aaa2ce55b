use clap::Args;
use serde::Serialize;

use deckhand::plan::{self, NamespaceSource, PlanEntry, PlanRequest};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct PlanArgs {
    pub workload: String,

    pub version: String,

    /// Target namespace (defaults to the version config, then the global default)
    #[arg(long)]
    pub namespace: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutput {
    command: String,
    workload: String,
    version: String,
    namespace: String,
    namespace_source: NamespaceSource,
    steps: Vec<PlanEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

pub fn run(args: PlanArgs, global: &GlobalArgs) -> CmdResult<PlanOutput> {
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

    Ok((
        PlanOutput {
            command: "plan".to_string(),
            steps: plan.entries(),
            workload: plan.workload,
            version: plan.version,
            namespace: plan.namespace.namespace,
            namespace_source: plan.namespace.source,
            warnings: plan.warnings,
        },
        0,
    ))
}
