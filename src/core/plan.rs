//! Build the ordered deployment plan for one workload version.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::{self, Artifact, ArtifactType, SourceDir, WorkloadLayout};
use crate::defaults::Defaults;
use crate::error::{Error, ErrorCode, Result};
use crate::store::{TemplateStore, VersionConfig};
use crate::synthesize::{self, Command, SynthesisContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceSource {
    Explicit,
    VersionConfig,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNamespace {
    pub namespace: String,
    pub source: NamespaceSource,
}

fn namespace_regex() -> &'static Regex {
    static NAMESPACE: OnceLock<Regex> = OnceLock::new();
    NAMESPACE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("namespace pattern")
    })
}

/// The single place a plan's namespace is decided: explicit argument, then
/// the version config record, then the configured default.
pub fn resolve_namespace(
    explicit: Option<&str>,
    config: Option<&VersionConfig>,
    defaults: &Defaults,
) -> Result<ResolvedNamespace> {
    let non_empty = |value: Option<&str>| value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);

    let (namespace, source) = if let Some(ns) = non_empty(explicit) {
        (ns, NamespaceSource::Explicit)
    } else if let Some(ns) = non_empty(config.and_then(|c| c.namespace.as_deref())) {
        (ns, NamespaceSource::VersionConfig)
    } else {
        (defaults.default_namespace.trim().to_string(), NamespaceSource::Default)
    };

    if namespace.len() > 63 || !namespace_regex().is_match(&namespace) {
        return Err(Error::validation_invalid_argument(
            "namespace",
            "Namespace must be a lowercase RFC 1123 label (max 63 characters)",
            Some(namespace),
            None,
        ));
    }

    Ok(ResolvedNamespace { namespace, source })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub artifact: Artifact,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    pub workload: String,
    pub version: String,
    pub namespace: ResolvedNamespace,
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One row of the "list plan" view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub command: String,
    pub file_name: String,
    pub label_keys: Vec<String>,
    pub namespace: String,
}

pub fn label_keys(artifact_type: ArtifactType) -> Vec<String> {
    let key = artifact_type.label_key();
    vec![
        format!("deploy.step.{}.title", key),
        format!("deploy.step.{}.description", key),
    ]
}

impl DeploymentPlan {
    pub fn entries(&self) -> Vec<PlanEntry> {
        self.steps
            .iter()
            .map(|step| PlanEntry {
                artifact_type: step.artifact.artifact_type,
                command: step.command.text.clone(),
                file_name: step.artifact.file_name.clone(),
                label_keys: label_keys(step.artifact.artifact_type),
                namespace: step.command.namespace.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub workload: &'a str,
    pub version: &'a str,
    pub namespace: Option<&'a str>,
}

pub fn build_plan(
    store: &dyn TemplateStore,
    defaults: &Defaults,
    request: &PlanRequest<'_>,
) -> Result<DeploymentPlan> {
    let workload = request.workload.trim();
    let version = request.version.trim();
    if workload.is_empty() || version.is_empty() {
        return Err(Error::validation_missing_argument(vec![
            "workload".to_string(),
            "version".to_string(),
        ]));
    }

    let config = store.load_version_config(workload, version)?;
    let namespace = resolve_namespace(request.namespace, config.as_ref(), defaults)?;

    let mut warnings = Vec::new();
    let scripts = list_or_warn(store, workload, SourceDir::Scripts, &mut warnings)?;
    let root = list_or_warn(store, workload, SourceDir::Root, &mut warnings)?;

    let layout = WorkloadLayout {
        workload,
        scripts_dir: store.scripts_dir(),
    };
    let artifacts = artifact::discover(layout, version, &namespace.namespace, &scripts, &root);

    let ctx = SynthesisContext {
        workload,
        mount_path: &defaults.mount_path,
        tools: &defaults.tools,
    };
    let steps: Vec<PlanStep> = artifacts
        .into_iter()
        .map(|artifact| PlanStep {
            command: synthesize::synthesize(&artifact, &ctx),
            artifact,
        })
        .collect();

    if steps.is_empty() {
        warnings.push(format!(
            "No artifacts found for {} version {}",
            workload, version
        ));
    }

    tracing::info!(
        workload,
        version,
        namespace = %namespace.namespace,
        steps = steps.len(),
        "deployment plan built"
    );

    Ok(DeploymentPlan {
        workload: workload.to_string(),
        version: version.to_string(),
        namespace,
        steps,
        warnings,
    })
}

/// An unreadable source directory contributes no candidates.
fn list_or_warn(
    store: &dyn TemplateStore,
    workload: &str,
    source: SourceDir,
    warnings: &mut Vec<String>,
) -> Result<Vec<String>> {
    match store.list_candidates(workload, source) {
        Ok(names) => Ok(names),
        Err(err) if err.code == ErrorCode::DirectoryUnreadable => {
            let path = err.details["path"].as_str().unwrap_or_default().to_string();
            tracing::warn!(workload, ?source, path = %path, "source directory unreadable");
            warnings.push(format!("Skipped unreadable directory {}", path));
            Ok(Vec::new())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::builtin_defaults;

    #[test]
    fn namespace_precedence() {
        let defaults = builtin_defaults();
        let config = VersionConfig {
            namespace: Some("from-config".to_string()),
            ..Default::default()
        };

        let explicit = resolve_namespace(Some("team-a"), Some(&config), &defaults).unwrap();
        assert_eq!(explicit.namespace, "team-a");
        assert_eq!(explicit.source, NamespaceSource::Explicit);

        let configured = resolve_namespace(Some("  "), Some(&config), &defaults).unwrap();
        assert_eq!(configured.namespace, "from-config");
        assert_eq!(configured.source, NamespaceSource::VersionConfig);

        let fallback = resolve_namespace(None, None, &defaults).unwrap();
        assert_eq!(fallback.namespace, "default");
        assert_eq!(fallback.source, NamespaceSource::Default);
    }

    #[test]
    fn invalid_namespace_is_rejected() {
        let defaults = builtin_defaults();
        for bad in ["Team-A", "-team", "team_a", &"a".repeat(64)] {
            let err = resolve_namespace(Some(bad), None, &defaults).unwrap_err();
            assert_eq!(err.code, ErrorCode::ValidationInvalidArgument, "{}", bad);
        }
    }

    #[test]
    fn label_keys_use_lowercase_type() {
        assert_eq!(
            label_keys(ArtifactType::ConfigMap),
            vec!["deploy.step.configmap.title", "deploy.step.configmap.description"]
        );
    }
}
