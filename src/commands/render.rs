use std::collections::HashMap;

use clap::Args;
use serde::Serialize;

use deckhand::render::{self, RenderOutput, RenderRequest};
use deckhand::Error;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct RenderArgs {
    pub workload: String,

    pub version: String,

    /// Template file name under the workload's templates/ directory
    pub template: String,

    /// Placeholder value, overriding the version config (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Namespace to inject (defaults to the version config, then the global default)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Fail when any placeholder is left unresolved
    #[arg(long)]
    pub strict: bool,

    /// Materialize without writing the artifact file
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderCommandOutput {
    command: String,
    #[serde(flatten)]
    result: RenderOutput,
}

pub fn run(args: RenderArgs, global: &GlobalArgs) -> CmdResult<RenderCommandOutput> {
    let defaults = super::load_defaults()?;
    let store = global.store(&defaults);

    let request = RenderRequest {
        workload: &args.workload,
        version: &args.version,
        template: &args.template,
        namespace: args.namespace.as_deref(),
        overrides: parse_set_values(&args.set)?,
        strict: args.strict,
        dry_run: args.dry_run,
    };
    let result = render::render(&store, &defaults, &request)?;

    if let Some(path) = &result.relative_path {
        deckhand::log_status!("render", "Wrote {}", path);
    }

    Ok((
        RenderCommandOutput {
            command: "render".to_string(),
            result,
        },
        0,
    ))
}

fn parse_set_values(pairs: &[String]) -> deckhand::Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .ok_or_else(|| {
                    Error::validation_invalid_argument(
                        "set",
                        "Expected KEY=VALUE",
                        Some(pair.clone()),
                        None,
                    )
                })?;
            Ok((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_values_split_on_first_equals() {
        let values = parse_set_values(&["image=repo/app:1.0".to_string(), "args=a=b".to_string()]).unwrap();
        assert_eq!(values["image"], "repo/app:1.0");
        assert_eq!(values["args"], "a=b");
    }

    #[test]
    fn set_values_require_a_key() {
        assert!(parse_set_values(&["novalue".to_string()]).is_err());
        assert!(parse_set_values(&["=x".to_string()]).is_err());
    }
}
