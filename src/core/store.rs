//! Access to workload templates, version config records and artifact files.
//!
//! Layout under the template root:
//!
//! ```text
//! <root>/<workload>/                       root deployment dir (chart)
//! <root>/<workload>/<scripts_dir>/         scripts dir
//! <root>/<workload>/templates/<template>   raw templates
//! <root>/<workload>/config/<version>.json  version config record
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::SourceDir;
use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::utils::io;

const TEMPLATES_DIR: &str = "templates";
const CONFIG_DIR: &str = "config";

/// Per workload-version record of previously resolved values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl VersionConfig {
    /// Values as strings. Numbers and booleans are stringified, nulls dropped,
    /// nested structures rendered as compact JSON.
    pub fn string_values(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .filter_map(|(key, value)| {
                let rendered = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((key.clone(), rendered))
            })
            .collect()
    }
}

pub trait TemplateStore {
    fn read_template(&self, workload: &str, template: &str) -> Result<String>;

    fn load_version_config(&self, workload: &str, version: &str) -> Result<Option<VersionConfig>>;

    /// File names in one source directory, in discovery order.
    fn list_candidates(&self, workload: &str, source: SourceDir) -> Result<Vec<String>>;

    /// Persist a materialized artifact; returns its path relative to the root.
    fn write_artifact(
        &self,
        workload: &str,
        source: SourceDir,
        file_name: &str,
        content: &str,
    ) -> Result<String>;

    fn scripts_dir(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct FsTemplateStore {
    root: PathBuf,
    scripts_dir: String,
}

impl FsTemplateStore {
    pub fn new(root: impl Into<PathBuf>, scripts_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            scripts_dir: scripts_dir.into(),
        }
    }

    pub fn from_defaults(defaults: &Defaults, root_override: Option<&Path>) -> Self {
        let root = root_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| defaults.template_root_path());
        Self::new(root, defaults.scripts_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workload_dir(&self, workload: &str) -> Result<PathBuf> {
        validate_segment("workload", workload)?;
        let dir = self.root.join(workload);
        if !dir.is_dir() {
            return Err(Error::workload_not_found(
                workload,
                Some(dir.display().to_string()),
            ));
        }
        Ok(dir)
    }

    fn source_dir(&self, workload: &str, source: SourceDir) -> Result<PathBuf> {
        let dir = self.workload_dir(workload)?;
        Ok(match source {
            SourceDir::Scripts => dir.join(&self.scripts_dir),
            SourceDir::Root => dir,
        })
    }
}

impl TemplateStore for FsTemplateStore {
    fn read_template(&self, workload: &str, template: &str) -> Result<String> {
        validate_segment("template", template)?;
        let path = self.workload_dir(workload)?.join(TEMPLATES_DIR).join(template);
        if !path.is_file() {
            return Err(Error::template_not_found(
                template,
                Some(path.display().to_string()),
            ));
        }
        io::read_file(&path, &format!("read template {}", template))
    }

    fn load_version_config(&self, workload: &str, version: &str) -> Result<Option<VersionConfig>> {
        validate_segment("version", version)?;
        let path = self
            .workload_dir(workload)?
            .join(CONFIG_DIR)
            .join(format!("{}.json", version));
        if !path.is_file() {
            return Ok(None);
        }

        let content = io::read_file(&path, &format!("read config {}", version))?;
        let config = serde_json::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
        Ok(Some(config))
    }

    fn list_candidates(&self, workload: &str, source: SourceDir) -> Result<Vec<String>> {
        io::list_file_names(&self.source_dir(workload, source)?)
    }

    fn write_artifact(
        &self,
        workload: &str,
        source: SourceDir,
        file_name: &str,
        content: &str,
    ) -> Result<String> {
        validate_segment("file_name", file_name)?;
        let path = self.source_dir(workload, source)?.join(file_name);
        io::write_file_atomic(&path, content, &format!("write artifact {}", file_name))?;

        Ok(match source {
            SourceDir::Scripts => format!("{}/{}/{}", workload, self.scripts_dir, file_name),
            SourceDir::Root => format!("{}/{}", workload, file_name),
        })
    }

    fn scripts_dir(&self) -> &str {
        &self.scripts_dir
    }
}

/// Reject names that would escape their directory.
fn validate_segment(field: &str, value: &str) -> Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
    {
        return Err(Error::validation_invalid_argument(
            field,
            "Must be a single path segment",
            Some(value.to_string()),
            None,
        ));
    }
    Ok(())
}
