use clap::Args;
use serde::Serialize;

use deckhand::placeholder::PlaceholderCatalog;
use deckhand::render;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct PlaceholdersArgs {
    /// Workload directory name under the template root
    pub workload: String,

    /// Template file name under the workload's templates/ directory
    pub template: String,

    /// Resolve values from this version's config record
    #[arg(long)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholdersOutput {
    command: String,
    workload: String,
    template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    total: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unresolved: Vec<String>,
    catalog: PlaceholderCatalog,
}

pub fn run(args: PlaceholdersArgs, global: &GlobalArgs) -> CmdResult<PlaceholdersOutput> {
    let defaults = super::load_defaults()?;
    let store = global.store(&defaults);

    let catalog = render::inspect_placeholders(
        &store,
        &args.workload,
        &args.template,
        args.version.as_deref(),
    )?;

    // Without a version nothing was resolved, so "unresolved" would just repeat the catalog.
    let unresolved = if args.version.is_some() {
        catalog.unresolved()
    } else {
        Vec::new()
    };

    Ok((
        PlaceholdersOutput {
            command: "placeholders".to_string(),
            workload: args.workload,
            template: args.template,
            version: args.version,
            total: catalog.len(),
            unresolved,
            catalog,
        },
        0,
    ))
}
