//! Artifact discovery, classification and dependency ordering.
//!
//! File naming convention: `<workload>-<version>-<type-token>.yaml`. The token
//! right before the extension decides the type, except that a name containing
//! `final` anywhere is always `Final`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactType {
    Quota,
    StorageClass,
    PersistentVolume,
    ConfigMap,
    Secret,
    Deployment,
    Final,
    Unknown,
}

impl ArtifactType {
    /// Apply order. Variants are declared in this order, Unknown last.
    pub const ORDER: [ArtifactType; 8] = [
        ArtifactType::Quota,
        ArtifactType::StorageClass,
        ArtifactType::PersistentVolume,
        ArtifactType::ConfigMap,
        ArtifactType::Secret,
        ArtifactType::Deployment,
        ArtifactType::Final,
        ArtifactType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Quota => "Quota",
            ArtifactType::StorageClass => "StorageClass",
            ArtifactType::PersistentVolume => "PersistentVolume",
            ArtifactType::ConfigMap => "ConfigMap",
            ArtifactType::Secret => "Secret",
            ArtifactType::Deployment => "Deployment",
            ArtifactType::Final => "Final",
            ArtifactType::Unknown => "Unknown",
        }
    }

    /// Lowercase key used for UI labels (`deploy.step.<key>.title`).
    pub fn label_key(&self) -> &'static str {
        match self {
            ArtifactType::Quota => "quota",
            ArtifactType::StorageClass => "storageclass",
            ArtifactType::PersistentVolume => "persistentvolume",
            ArtifactType::ConfigMap => "configmap",
            ArtifactType::Secret => "secret",
            ArtifactType::Deployment => "deployment",
            ArtifactType::Final => "final",
            ArtifactType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const FINAL_TOKEN: &str = "final";

pub const RESOURCE_EXTENSIONS: &[&str] = &[".yaml", ".yml"];

/// Type tokens recognized right before the extension.
const TYPE_TOKENS: &[(&[&str], ArtifactType)] = &[
    (&["quota", "resourcequota"], ArtifactType::Quota),
    (&["storageclass"], ArtifactType::StorageClass),
    (
        &["pv", "pvc", "persistentvolume", "persistentvolumeclaim"],
        ArtifactType::PersistentVolume,
    ),
    (&["configmap"], ArtifactType::ConfigMap),
    (&["secret"], ArtifactType::Secret),
    (&["deployment"], ArtifactType::Deployment),
];

/// Which directory a candidate file was discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDir {
    Scripts,
    Root,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub file_name: String,
    /// Forward-slash path relative to the template root.
    pub relative_path: String,
    pub source: SourceDir,
    pub is_final_in_root: bool,
    pub namespace: String,
}

pub(crate) fn strip_resource_extension(file_name: &str) -> Option<&str> {
    RESOURCE_EXTENSIONS.iter().find_map(|ext| {
        let split = file_name.len().checked_sub(ext.len())?;
        let suffix = file_name.get(split..)?;
        suffix.eq_ignore_ascii_case(ext).then(|| &file_name[..split])
    })
}

/// Classify a file name. Never fails: unrecognized names are `Unknown`.
pub fn classify(file_name: &str) -> ArtifactType {
    if file_name.to_lowercase().contains(FINAL_TOKEN) {
        return ArtifactType::Final;
    }

    let stem = strip_resource_extension(file_name).unwrap_or(file_name);
    let token = match stem.rsplit_once('-') {
        Some((_, token)) => token.to_lowercase(),
        None => return ArtifactType::Unknown,
    };

    TYPE_TOKENS
        .iter()
        .find(|(tokens, _)| tokens.contains(&token.as_str()))
        .map(|(_, artifact_type)| *artifact_type)
        .unwrap_or(ArtifactType::Unknown)
}

/// Whether `file_name` belongs to `version` and may be planned from `source`.
pub fn is_candidate(file_name: &str, version: &str, source: SourceDir) -> bool {
    if version.is_empty() || !file_name.contains(version) {
        return false;
    }
    if strip_resource_extension(file_name).is_none() {
        return false;
    }
    match source {
        SourceDir::Scripts => true,
        SourceDir::Root => file_name.to_lowercase().contains(FINAL_TOKEN),
    }
}

/// Where a workload's files live, relative to the template root.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadLayout<'a> {
    pub workload: &'a str,
    pub scripts_dir: &'a str,
}

impl WorkloadLayout<'_> {
    pub fn relative_path(&self, source: SourceDir, file_name: &str) -> String {
        match source {
            SourceDir::Scripts => format!("{}/{}/{}", self.workload, self.scripts_dir, file_name),
            SourceDir::Root => format!("{}/{}", self.workload, file_name),
        }
    }
}

/// Filter, classify and order the files of one workload version.
///
/// `scripts` and `root` must be given in discovery order; scripts files come
/// first and equal types keep that order.
pub fn discover(
    layout: WorkloadLayout<'_>,
    version: &str,
    namespace: &str,
    scripts: &[String],
    root: &[String],
) -> Vec<Artifact> {
    let sources = scripts
        .iter()
        .map(|name| (SourceDir::Scripts, name))
        .chain(root.iter().map(|name| (SourceDir::Root, name)));

    let mut artifacts: Vec<Artifact> = sources
        .filter(|(source, name)| is_candidate(name, version, *source))
        .map(|(source, name)| {
            let artifact_type = classify(name);
            if artifact_type == ArtifactType::Unknown {
                tracing::warn!(
                    workload = layout.workload,
                    file = %name,
                    "unrecognized artifact type, ordering last"
                );
            }
            Artifact {
                artifact_type,
                file_name: name.clone(),
                relative_path: layout.relative_path(source, name),
                source,
                is_final_in_root: source == SourceDir::Root && artifact_type == ArtifactType::Final,
                namespace: namespace.to_string(),
            }
        })
        .collect();

    order(&mut artifacts);
    artifacts
}

/// Stable sort by apply order.
pub fn order(artifacts: &mut [Artifact]) {
    artifacts.sort_by_key(|a| a.artifact_type);
}
