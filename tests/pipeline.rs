use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use deckhand::artifact::ArtifactType;
use deckhand::defaults::builtin_defaults;
use deckhand::engine::{
    spawn_plan, CommandRunner, Engine, ExecutionEvent, FailureKind, StepStatus,
};
use deckhand::plan::{build_plan, NamespaceSource, PlanRequest};
use deckhand::render::{render, RenderRequest};
use deckhand::store::FsTemplateStore;
use deckhand::utils::command::{CapturedOutput, LimitedOutput, RunLimits, Termination};
use deckhand::ErrorCode;
use tempfile::TempDir;

const QUOTA: &str = "apiVersion: v1\nkind: ResourceQuota\nmetadata:\n  name: ${name}-quota\nspec:\n  hard:\n    cpu: \"${cpu_limit#[2, 4]}\"\n";
const CONFIGMAP: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ${name}-config\ndata:\n  port: \"${service_port#[8080]}\"\n";
const SECRET: &str = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: ${name}-secret\nstringData:\n  password: ${db_password}\n";
const VALUES_FINAL: &str = "replicaCount: ${replica_count#[1]}\nimage:\n  repository: ${image_repository}\n  tag: \"${image_tag}\"\n";

/// Records argv and fails any command whose file path mentions "secret".
struct RecordingRunner {
    calls: Mutex<Vec<String>>,
}

impl CommandRunner for RecordingRunner {
    fn run(&self, argv: &[String], _limits: RunLimits) -> deckhand::Result<LimitedOutput> {
        let line = argv.join(" ");
        self.calls.lock().unwrap().push(line.clone());

        let (output, termination) = if line.contains("secret") {
            (
                CapturedOutput::new(
                    String::new(),
                    "Error from server (Forbidden): secrets is forbidden: permission denied\n".to_string(),
                ),
                Termination::Exited(Some(1)),
            )
        } else {
            (
                CapturedOutput::new("resource created\n".to_string(), String::new()),
                Termination::Exited(Some(0)),
            )
        };
        Ok(LimitedOutput { output, termination })
    }
}

fn workspace() -> (TempDir, FsTemplateStore) {
    let dir = TempDir::new().unwrap();
    let workload = dir.path().join("myapp");
    fs::create_dir_all(workload.join("templates")).unwrap();
    fs::create_dir_all(workload.join("config")).unwrap();

    for (name, body) in [
        ("quota.yaml", QUOTA),
        ("configmap.yaml", CONFIGMAP),
        ("secret.yaml", SECRET),
        ("values-final.yaml", VALUES_FINAL),
    ] {
        fs::write(workload.join("templates").join(name), body).unwrap();
    }

    fs::write(
        workload.join("config/1.0.0.json"),
        r#"{
            "namespace": "team-a",
            "values": {
                "name": "web",
                "cpu_limit": "2",
                "service_port": 8080,
                "db_password": "s3cr3t",
                "replica_count": 2,
                "image_repository": "registry.local/web",
                "image_tag": "1.0.0"
            }
        }"#,
    )
    .unwrap();

    let store = FsTemplateStore::new(dir.path(), "deploy-scripts");
    (dir, store)
}

fn render_all(store: &FsTemplateStore) {
    let defaults = builtin_defaults();
    // Rendered in an order unrelated to apply order.
    for template in ["values-final.yaml", "secret.yaml", "configmap.yaml", "quota.yaml"] {
        let output = render(
            store,
            &defaults,
            &RenderRequest {
                workload: "myapp",
                version: "1.0.0",
                template,
                strict: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(output.written, "{} was not written", template);
    }
}

#[test]
fn rendered_artifacts_are_planned_in_dependency_order() {
    let (dir, store) = workspace();
    render_all(&store);

    let quota = fs::read_to_string(dir.path().join("myapp/deploy-scripts/myapp-1.0.0-quota.yaml")).unwrap();
    assert!(quota.contains("metadata:\n  namespace: team-a\n  name: web-quota\n"));
    assert!(dir.path().join("myapp/myapp-1.0.0-values-final.yaml").is_file());

    let plan = build_plan(
        &store,
        &builtin_defaults(),
        &PlanRequest {
            workload: "myapp",
            version: "1.0.0",
            namespace: None,
        },
    )
    .unwrap();

    assert_eq!(plan.namespace.namespace, "team-a");
    assert_eq!(plan.namespace.source, NamespaceSource::VersionConfig);
    assert!(plan.warnings.is_empty());

    let entries = plan.entries();
    let types: Vec<ArtifactType> = entries.iter().map(|e| e.artifact_type).collect();
    assert_eq!(
        types,
        vec![
            ArtifactType::Quota,
            ArtifactType::ConfigMap,
            ArtifactType::Secret,
            ArtifactType::Final,
        ]
    );

    assert_eq!(
        entries[1].command,
        "kubectl apply -f /app/deploymentTemplate/myapp/deploy-scripts/myapp-1.0.0-configmap.yaml --namespace team-a"
    );
    assert_eq!(
        entries[3].command,
        "helm upgrade --install myapp /app/deploymentTemplate/myapp -f /app/deploymentTemplate/myapp/myapp-1.0.0-values-final.yaml --namespace team-a --create-namespace"
    );
    assert_eq!(
        entries[0].label_keys,
        vec!["deploy.step.quota.title", "deploy.step.quota.description"]
    );
    assert!(entries.iter().all(|e| e.namespace == "team-a"));
}

#[test]
fn explicit_namespace_overrides_config_record() {
    let (_dir, store) = workspace();
    render_all(&store);

    let plan = build_plan(
        &store,
        &builtin_defaults(),
        &PlanRequest {
            workload: "myapp",
            version: "1.0.0",
            namespace: Some("staging"),
        },
    )
    .unwrap();

    assert_eq!(plan.namespace.source, NamespaceSource::Explicit);
    assert!(plan.entries().iter().all(|e| e.command.contains("--namespace staging")));
}

#[test]
fn missing_directories_yield_warnings_not_errors() {
    let (_dir, store) = workspace();

    let plan = build_plan(
        &store,
        &builtin_defaults(),
        &PlanRequest {
            workload: "myapp",
            version: "1.0.0",
            namespace: None,
        },
    )
    .unwrap();

    assert!(plan.is_empty());
    assert_eq!(plan.warnings.len(), 2);
    assert!(plan.warnings[0].contains("deploy-scripts"));
}

#[test]
fn unknown_workload_is_not_found() {
    let (_dir, store) = workspace();
    let err = build_plan(
        &store,
        &builtin_defaults(),
        &PlanRequest {
            workload: "other",
            version: "1.0.0",
            namespace: None,
        },
    )
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::WorkloadNotFound);
}

#[test]
fn execution_continues_past_failed_step() {
    let (_dir, store) = workspace();
    render_all(&store);
    let plan = build_plan(
        &store,
        &builtin_defaults(),
        &PlanRequest {
            workload: "myapp",
            version: "1.0.0",
            namespace: None,
        },
    )
    .unwrap();

    let runner = Arc::new(RecordingRunner {
        calls: Mutex::new(Vec::new()),
    });
    let engine = Engine::new(runner.clone());
    let report = engine.execute(&plan, |_| {});

    let statuses: Vec<StepStatus> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Success,
            StepStatus::Success,
            StepStatus::Error,
            StepStatus::Success,
        ]
    );
    assert!(report.has_error);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.namespace, "team-a");

    let failure = report.results[2].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::PermissionDenied);
    assert!(failure.raw.contains("forbidden"));

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 4);
    assert!(calls[3].starts_with("helm upgrade --install myapp"));
}

#[test]
fn event_stream_ends_with_the_report() {
    let (_dir, store) = workspace();
    render_all(&store);
    let plan = build_plan(
        &store,
        &builtin_defaults(),
        &PlanRequest {
            workload: "myapp",
            version: "1.0.0",
            namespace: None,
        },
    )
    .unwrap();
    let steps = plan.len();

    let engine = Engine::new(Arc::new(RecordingRunner {
        calls: Mutex::new(Vec::new()),
    }));
    let (events, worker) = spawn_plan(engine, plan);

    let mut last_status: HashMap<usize, StepStatus> = HashMap::new();
    let mut finished = None;
    for event in events {
        match event {
            ExecutionEvent::Step(update) => {
                last_status.insert(update.index, update.status);
            }
            ExecutionEvent::Finished(report) => finished = Some(report),
        }
    }

    let report = worker.join().unwrap();
    assert_eq!(finished.as_ref(), Some(&report));
    assert_eq!(last_status.len(), steps);
    assert_eq!(last_status[&2], StepStatus::Error);

    let line = serde_json::to_value(ExecutionEvent::Finished(report)).unwrap();
    assert_eq!(line["event"], "finished");
    assert_eq!(line["hasError"], true);
}
