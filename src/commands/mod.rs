use std::path::PathBuf;

use deckhand::defaults::{self, Defaults};
use deckhand::store::FsTemplateStore;

pub type CmdResult<T> = deckhand::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    /// Template root override (`--root`).
    pub(crate) root: Option<PathBuf>,
}

impl GlobalArgs {
    pub(crate) fn store(&self, defaults: &Defaults) -> FsTemplateStore {
        FsTemplateStore::from_defaults(defaults, self.root.as_deref())
    }
}

/// Global defaults, rejected early when unusable.
pub(crate) fn load_defaults() -> deckhand::Result<Defaults> {
    let defaults = defaults::load_defaults();
    defaults.validate()?;
    Ok(defaults)
}

pub mod config;
pub mod exec;
pub mod placeholders;
pub mod plan;
pub mod render;
pub mod run;

macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (deckhand::Result<serde_json::Value>, i32) {
    crate::tty::status("deckhand is working...");

    match command {
        crate::Commands::Placeholders(args) => dispatch!(args, global, placeholders),
        crate::Commands::Render(args) => dispatch!(args, global, render),
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Exec(args) => dispatch!(args, global, exec),
        crate::Commands::Config(args) => dispatch!(args, global, config),
    }
}
