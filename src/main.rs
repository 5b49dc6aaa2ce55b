use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{config, exec, placeholders, plan, render, run};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(version = VERSION)]
#[command(about = "Resolve deployment templates and apply them to a cluster in dependency order")]
struct Cli {
    /// Template root directory (overrides templateRoot in deckhand.json)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the placeholders of a template, grouped by category
    Placeholders(placeholders::PlaceholdersArgs),
    /// Materialize a template into a deployable artifact
    Render(render::RenderArgs),
    /// Show the ordered command plan for a workload version
    Plan(plan::PlanArgs),
    /// Execute the plan for a workload version
    Run(run::RunArgs),
    /// Execute a single kubectl/helm command
    Exec(exec::ExecArgs),
    /// Manage global deckhand configuration
    Config(config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    deckhand::logging::init_logging();

    let global = GlobalArgs { root: cli.root };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
