//! One command per artifact: `kubectl apply` for plain manifests,
//! `helm upgrade --install` for the packaged workload's final values file.

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactType};
use crate::defaults::ToolsConfig;
use crate::utils::shell;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Display form; arguments are shell-quoted only when needed.
    pub text: String,
    pub argv: Vec<String>,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub namespace: String,
    pub file_name: String,
    pub is_deployment: bool,
}

impl Command {
    pub fn from_argv(
        argv: Vec<String>,
        artifact_type: ArtifactType,
        namespace: &str,
        file_name: &str,
        is_deployment: bool,
    ) -> Self {
        Self {
            text: shell::quote_args(&argv),
            argv,
            artifact_type,
            namespace: namespace.to_string(),
            file_name: file_name.to_string(),
            is_deployment,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesisContext<'a> {
    pub workload: &'a str,
    pub mount_path: &'a str,
    pub tools: &'a ToolsConfig,
}

/// Join a template-root-relative path onto the mount path, forward slashes only.
pub fn mounted_path(mount_path: &str, relative: &str) -> String {
    let mount = mount_path.replace('\\', "/");
    let relative = relative.replace('\\', "/");
    let relative = relative.trim_start_matches("./").trim_start_matches('/');

    let joined = format!("{}/{}", mount.trim_end_matches('/'), relative);
    let mut normalized = String::with_capacity(joined.len());
    let mut previous_slash = false;
    for ch in joined.chars() {
        if ch == '/' && previous_slash {
            continue;
        }
        previous_slash = ch == '/';
        normalized.push(ch);
    }
    normalized
}

pub fn synthesize(artifact: &Artifact, ctx: &SynthesisContext<'_>) -> Command {
    let file_path = mounted_path(ctx.mount_path, &artifact.relative_path);
    let mut argv: Vec<String> = ctx.tools.exec_wrapper.clone();

    if artifact.is_final_in_root {
        let chart_dir = mounted_path(ctx.mount_path, ctx.workload);
        argv.extend([
            ctx.tools.helm.clone(),
            "upgrade".to_string(),
            "--install".to_string(),
            ctx.workload.to_string(),
            chart_dir,
            "-f".to_string(),
            file_path,
            "--namespace".to_string(),
            artifact.namespace.clone(),
            "--create-namespace".to_string(),
        ]);
    } else {
        argv.extend([
            ctx.tools.kubectl.clone(),
            "apply".to_string(),
            "-f".to_string(),
            file_path,
            "--namespace".to_string(),
            artifact.namespace.clone(),
        ]);
    }

    Command::from_argv(
        argv,
        artifact.artifact_type,
        &artifact.namespace,
        &artifact.file_name,
        artifact.is_final_in_root,
    )
}
