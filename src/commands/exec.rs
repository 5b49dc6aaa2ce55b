use clap::Args;
use serde::Serialize;

use deckhand::engine::Engine;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ExecArgs {
    /// Command line to run, e.g. "kubectl get pods --namespace team-a"
    pub command: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCommandOutput {
    command: String,
    success: bool,
    output: String,
}

pub fn run(args: ExecArgs, _global: &GlobalArgs) -> CmdResult<ExecCommandOutput> {
    let defaults = super::load_defaults()?;
    let allowed = defaults.tools.allowed_prefixes();

    let result = Engine::default().execute_command(&args.command, &allowed)?;

    Ok((
        ExecCommandOutput {
            command: "exec".to_string(),
            success: result.success,
            output: result.output,
        },
        0,
    ))
}
