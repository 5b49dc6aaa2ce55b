use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Mount point of the template tree inside the runtime that executes commands.
pub const DEFAULT_MOUNT_PATH: &str = "/app/deploymentTemplate";

/// Root configuration structure for deckhand.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeckhandConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via deckhand.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default = "default_template_root")]
    pub template_root: String,

    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,

    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    #[serde(default = "default_tools")]
    pub tools: ToolsConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            template_root: default_template_root(),
            mount_path: default_mount_path(),
            scripts_dir: default_scripts_dir(),
            default_namespace: default_namespace(),
            tools: default_tools(),
        }
    }
}

impl Defaults {
    /// Reject settings the pipeline cannot work with.
    pub fn validate(&self) -> crate::Result<()> {
        let origin = config_file().ok().map(|p| p.display().to_string());

        for (key, value) in [
            ("templateRoot", &self.template_root),
            ("tools.kubectl", &self.tools.kubectl),
            ("tools.helm", &self.tools.helm),
        ] {
            if value.trim().is_empty() {
                return Err(crate::Error::config_missing_key(key, origin.clone()));
            }
        }

        if !self.mount_path.starts_with('/') {
            return Err(crate::Error::config_invalid_value(
                "mountPath",
                Some(self.mount_path.clone()),
                "Mount path must be absolute",
            ));
        }

        let scripts = self.scripts_dir.trim();
        if scripts.is_empty() || scripts.contains('/') || scripts.contains('\\') || scripts == ".." {
            return Err(crate::Error::config_invalid_value(
                "scriptsDir",
                Some(self.scripts_dir.clone()),
                "Scripts directory must be a single directory name",
            ));
        }

        Ok(())
    }

    /// Template root with `~` and environment variables expanded.
    pub fn template_root_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::full(&self.template_root).map_or_else(
            |_| self.template_root.clone(),
            |expanded| expanded.to_string(),
        ))
    }
}

/// Programs invoked for cluster operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolsConfig {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    #[serde(default = "default_helm")]
    pub helm: String,

    /// Argv prefix for running tools inside another runtime
    /// (e.g. `["docker", "exec", "k8s-tools"]`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec_wrapper: Vec<String>,
}

impl ToolsConfig {
    /// Argv prefixes an ad-hoc command may start with: each cluster tool,
    /// behind the full exec wrapper when one is configured.
    pub fn allowed_prefixes(&self) -> Vec<Vec<String>> {
        [&self.kubectl, &self.helm]
            .into_iter()
            .map(|tool| {
                let mut prefix = self.exec_wrapper.clone();
                prefix.push(tool.clone());
                prefix
            })
            .collect()
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_template_root() -> String {
    "./deploymentTemplate".to_string()
}

fn default_mount_path() -> String {
    DEFAULT_MOUNT_PATH.to_string()
}

fn default_scripts_dir() -> String {
    "deploy-scripts".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_tools() -> ToolsConfig {
    ToolsConfig {
        kubectl: default_kubectl(),
        helm: default_helm(),
        exec_wrapper: Vec::new(),
    }
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_helm() -> String {
    "helm".to_string()
}

// =============================================================================
// Loading functions
// =============================================================================

const CONFIG_FILE_NAME: &str = "deckhand.json";

/// `%APPDATA%\deckhand\deckhand.json` on Windows,
/// `~/.config/deckhand/deckhand.json` everywhere else.
fn config_file() -> crate::Result<PathBuf> {
    let (base_var, subdirs): (&str, &[&str]) = if cfg!(windows) {
        ("APPDATA", &["deckhand"][..])
    } else {
        ("HOME", &[".config", "deckhand"][..])
    };

    let base = env::var_os(base_var).ok_or_else(|| {
        crate::Error::internal_unexpected(format!(
            "{} is not set; cannot locate {}",
            base_var, CONFIG_FILE_NAME
        ))
    })?;

    let mut path = PathBuf::from(base);
    path.extend(subdirs);
    path.push(CONFIG_FILE_NAME);
    Ok(path)
}

/// Load defaults, merging file config with built-in defaults.
/// If deckhand.json is missing or invalid, silently returns built-in defaults.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full deckhand.json config, falling back to defaults on any error.
pub fn load_config() -> DeckhandConfig {
    match load_config_from_file() {
        Ok(config) => config,
        Err(err) => {
            tracing::debug!(error = %err, "using built-in defaults");
            DeckhandConfig::default()
        }
    }
}

/// Attempt to load config from deckhand.json file.
fn load_config_from_file() -> crate::Result<DeckhandConfig> {
    let path = config_file()?;

    if !path.exists() {
        return Err(crate::Error::other("deckhand.json not found"));
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        crate::Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse_config(&content, &path.display().to_string())
}

fn parse_config(content: &str, origin: &str) -> crate::Result<DeckhandConfig> {
    serde_json::from_str(content).map_err(|e| crate::Error::config_invalid_json(origin, e))
}

/// Check if deckhand.json file exists
pub fn config_exists() -> bool {
    config_file()
        .map(|p| p.exists())
        .unwrap_or(false)
}

/// Delete deckhand.json file (reset to defaults)
pub fn reset_config() -> crate::Result<bool> {
    let path = config_file()?;

    if path.exists() {
        fs::remove_file(&path).map_err(|e| {
            crate::Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
        })?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Get the path to deckhand.json (for display purposes)
pub fn config_path() -> crate::Result<String> {
    Ok(config_file()?.display().to_string())
}

/// Get built-in defaults (ignoring any file config)
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}
