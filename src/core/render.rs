//! Scan, resolve, materialize and persist one template as a deployable artifact.

use std::collections::HashMap;

use serde::Serialize;

use crate::artifact::{strip_resource_extension, SourceDir};
use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::materialize::{materialize, Materialized};
use crate::placeholder::{scan, PlaceholderCatalog};
use crate::plan::{resolve_namespace, ResolvedNamespace};
use crate::store::TemplateStore;

const FINAL_TOKEN: &str = "final";

#[derive(Debug, Clone, Default)]
pub struct RenderRequest<'a> {
    pub workload: &'a str,
    pub version: &'a str,
    pub template: &'a str,
    pub namespace: Option<&'a str>,
    /// Values that take precedence over the version config record.
    pub overrides: HashMap<String, String>,
    /// Fail with `template.unresolved` instead of leaving markers in place.
    pub strict: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    pub template: String,
    pub file_name: String,
    pub source: SourceDir,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    pub namespace: ResolvedNamespace,
    pub catalog: PlaceholderCatalog,
    #[serde(flatten)]
    pub materialized: Materialized,
    pub written: bool,
}

/// Artifact file name for a rendered template and the directory it goes to.
///
/// `configmap.yaml` for `myapp` 1.0.0 becomes `myapp-1.0.0-configmap.yaml` in
/// the scripts directory; stems containing `final` go to the root directory.
pub fn artifact_file_name(workload: &str, version: &str, template: &str) -> (String, SourceDir) {
    let stem = strip_resource_extension(template).unwrap_or(template);
    let source = if stem.to_lowercase().contains(FINAL_TOKEN) {
        SourceDir::Root
    } else {
        SourceDir::Scripts
    };
    (format!("{}-{}-{}.yaml", workload, version, stem), source)
}

/// Catalog for one template, resolved against the version config record
/// when a version is given. That record must exist.
pub fn inspect_placeholders(
    store: &dyn TemplateStore,
    workload: &str,
    template: &str,
    version: Option<&str>,
) -> Result<PlaceholderCatalog> {
    let raw = store.read_template(workload, template)?;
    let mut catalog = scan(template, &raw)?;

    if let Some(version) = version {
        let config = store
            .load_version_config(workload, version)?
            .ok_or_else(|| Error::version_config_not_found(format!("{}@{}", workload, version), None))?;
        catalog.resolve(&config.string_values());
    }

    Ok(catalog)
}

pub fn render(
    store: &dyn TemplateStore,
    defaults: &Defaults,
    request: &RenderRequest<'_>,
) -> Result<RenderOutput> {
    let raw = store.read_template(request.workload, request.template)?;
    let config = store.load_version_config(request.workload, request.version)?;
    let namespace = resolve_namespace(request.namespace, config.as_ref(), defaults)?;

    let base = config
        .as_ref()
        .map(|config| config.string_values())
        .unwrap_or_default();
    let values = merge_values(base, &request.overrides);

    let mut catalog = scan(request.template, &raw)?;
    catalog.resolve(&values);

    let materialized = materialize(
        request.template,
        &raw,
        &values,
        Some(namespace.namespace.as_str()),
    )?;

    if request.strict && !materialized.unresolved.is_empty() {
        return Err(Error::template_unresolved(
            request.template,
            materialized.unresolved.clone(),
        ));
    }
    if !materialized.unresolved.is_empty() {
        tracing::warn!(
            template = request.template,
            unresolved = ?materialized.unresolved,
            "template rendered with unresolved placeholders"
        );
    }

    let (file_name, source) = artifact_file_name(request.workload, request.version, request.template);
    let relative_path = if request.dry_run {
        None
    } else {
        Some(store.write_artifact(request.workload, source, &file_name, &materialized.content)?)
    };

    tracing::info!(
        workload = request.workload,
        version = request.version,
        template = request.template,
        file = %file_name,
        written = relative_path.is_some(),
        "template rendered"
    );

    Ok(RenderOutput {
        template: request.template.to_string(),
        file_name,
        source,
        written: relative_path.is_some(),
        relative_path,
        namespace,
        catalog,
        materialized,
    })
}

/// Overlay `overrides` on `base`. Placeholder names match case-insensitively,
/// so an override drops every base key that differs from it only in case.
fn merge_values(
    mut base: HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    for (name, value) in overrides {
        base.retain(|key, _| !key.eq_ignore_ascii_case(name));
        base.insert(name.clone(), value.clone());
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::builtin_defaults;
    use crate::error::ErrorCode;
    use crate::store::FsTemplateStore;
    use std::fs;
    use tempfile::TempDir;

    const CONFIGMAP: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ${name#[web]}\ndata:\n  replicas: \"${replica_count#[1, 2]}\"\n  image: ${image_tag}\n";

    fn fixture() -> (TempDir, FsTemplateStore) {
        let dir = TempDir::new().unwrap();
        let workload = dir.path().join("myapp");
        fs::create_dir_all(workload.join("templates")).unwrap();
        fs::create_dir_all(workload.join("config")).unwrap();
        fs::write(workload.join("templates/configmap.yaml"), CONFIGMAP).unwrap();
        fs::write(workload.join("templates/values-final.yaml"), "replicaCount: ${replica_count}\n").unwrap();
        fs::write(
            workload.join("config/1.0.0.json"),
            r#"{"namespace": "team-a", "values": {"name": "web", "replica_count": 3}}"#,
        )
        .unwrap();
        let store = FsTemplateStore::new(dir.path(), "deploy-scripts");
        (dir, store)
    }

    fn request<'a>(template: &'a str) -> RenderRequest<'a> {
        RenderRequest {
            workload: "myapp",
            version: "1.0.0",
            template,
            ..Default::default()
        }
    }

    #[test]
    fn file_names_follow_convention() {
        assert_eq!(
            artifact_file_name("myapp", "1.0.0", "configmap.yaml"),
            ("myapp-1.0.0-configmap.yaml".to_string(), SourceDir::Scripts)
        );
        assert_eq!(
            artifact_file_name("myapp", "1.0.0", "values-final.yml"),
            ("myapp-1.0.0-values-final.yaml".to_string(), SourceDir::Root)
        );
    }

    #[test]
    fn renders_with_config_values_and_overrides() {
        let (dir, store) = fixture();
        let mut req = request("configmap.yaml");
        req.overrides.insert("image_tag".to_string(), "1.2.3".to_string());

        let output = render(&store, &builtin_defaults(), &req).unwrap();

        assert!(output.written);
        assert_eq!(
            output.relative_path.as_deref(),
            Some("myapp/deploy-scripts/myapp-1.0.0-configmap.yaml")
        );
        assert!(output.materialized.unresolved.is_empty());
        assert!(output.materialized.namespace_injected);
        assert_eq!(output.namespace.namespace, "team-a");

        let written =
            fs::read_to_string(dir.path().join("myapp/deploy-scripts/myapp-1.0.0-configmap.yaml")).unwrap();
        assert_eq!(written, output.materialized.content);
        assert!(written.contains("  namespace: team-a\n  name: web\n"));
        assert!(written.contains("replicas: \"3\""));
        assert!(written.contains("image: 1.2.3"));
    }

    #[test]
    fn unresolved_placeholders_are_reported_or_rejected() {
        let (dir, store) = fixture();

        let lenient = render(&store, &builtin_defaults(), &request("configmap.yaml")).unwrap();
        assert_eq!(lenient.materialized.unresolved, vec!["image_tag"]);
        assert_eq!(lenient.catalog.unresolved(), vec!["image_tag"]);

        fs::remove_file(dir.path().join("myapp/deploy-scripts/myapp-1.0.0-configmap.yaml")).unwrap();
        let mut strict = request("configmap.yaml");
        strict.strict = true;
        let err = render(&store, &builtin_defaults(), &strict).unwrap_err();
        assert_eq!(err.code, ErrorCode::TemplateUnresolved);
        assert!(!dir.path().join("myapp/deploy-scripts/myapp-1.0.0-configmap.yaml").exists());
    }

    #[test]
    fn overrides_replace_config_keys_of_any_case() {
        let (dir, store) = fixture();
        let workload = dir.path().join("myapp");
        fs::write(workload.join("templates/scale.yaml"), "a: ${replica_count}\n").unwrap();
        fs::write(
            workload.join("config/2.0.0.json"),
            r#"{"values": {"Replica_Count": "1"}}"#,
        )
        .unwrap();

        let mut req = request("scale.yaml");
        req.version = "2.0.0";
        req.dry_run = true;
        req.overrides.insert("replica_count".to_string(), "5".to_string());

        let output = render(&store, &builtin_defaults(), &req).unwrap();
        assert_eq!(output.materialized.content, "a: 5\n");
        assert_eq!(
            output.catalog.get("replica_count").unwrap().resolved_value.as_deref(),
            Some("5")
        );
    }

    #[test]
    fn merge_drops_case_variants_of_overridden_names() {
        let base = HashMap::from([
            ("Replica_Count".to_string(), "1".to_string()),
            ("image".to_string(), "app:1".to_string()),
        ]);
        let overrides = HashMap::from([("REPLICA_COUNT".to_string(), "4".to_string())]);

        let merged = merge_values(base, &overrides);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["REPLICA_COUNT"], "4");
        assert_eq!(merged["image"], "app:1");
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (dir, store) = fixture();
        let mut req = request("values-final.yaml");
        req.dry_run = true;

        let output = render(&store, &builtin_defaults(), &req).unwrap();
        assert!(!output.written);
        assert_eq!(output.source, SourceDir::Root);
        assert_eq!(output.materialized.content, "replicaCount: 3\n");
        assert!(!dir.path().join("myapp/myapp-1.0.0-values-final.yaml").exists());
    }

    #[test]
    fn inspect_resolves_only_with_version() {
        let (_dir, store) = fixture();

        let bare = inspect_placeholders(&store, "myapp", "configmap.yaml", None).unwrap();
        assert_eq!(bare.unresolved().len(), 3);

        let resolved = inspect_placeholders(&store, "myapp", "configmap.yaml", Some("1.0.0")).unwrap();
        assert_eq!(
            resolved.get("replica_count").unwrap().resolved_value.as_deref(),
            Some("3")
        );
        assert_eq!(resolved.get("replica_count").unwrap().default_values, vec!["1", "2"]);

        let err = inspect_placeholders(&store, "myapp", "configmap.yaml", Some("9.9.9")).unwrap_err();
        assert_eq!(err.code, ErrorCode::VersionConfigNotFound);
    }
}
