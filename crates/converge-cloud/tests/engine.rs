//! End-to-end engine tests: diff → plan → apply against a scripted
//! in-memory provider.

use async_trait::async_trait;
use converge_cloud::{
    ActionType, ApplyReport, Attrs, Created, Executor, GlobalState, ItemStatus, KindSchema, Plan,
    ProviderError, ProviderRegistry, ProviderResult, ResourceProvider, RetryConfig, StateManager,
    diff, plan, refresh_state, resolve_outputs,
};
use converge_core::{AttrValue, DeclarationSet, DependencyGraph, ResourceDecl, ResourceId};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
enum Failure {
    Permanent,
    Transient(u32),
}

/// Shared fake cloud: one object namespace, an event log, and scripted
/// failures keyed by `op:kind`.
#[derive(Default)]
struct FakeCloud {
    log: Mutex<Vec<String>>,
    counter: Mutex<u64>,
    objects: Mutex<HashMap<String, Attrs>>,
    failures: Mutex<HashMap<String, Failure>>,
}

impl FakeCloud {
    fn push_log(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn log_entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn log_position(&self, entry: &str) -> usize {
        let entries = self.log_entries();
        entries
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("no log entry '{entry}' in {entries:?}"))
    }

    fn fail(&self, key: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .insert(key.to_string(), failure);
    }

    fn take_failure(&self, key: &str) -> Option<ProviderError> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(key) {
            Some(Failure::Permanent) => {
                Some(ProviderError::permanent(format!("scripted failure: {key}")))
            }
            Some(Failure::Transient(remaining)) => {
                if *remaining == 0 {
                    failures.remove(key);
                    return None;
                }
                *remaining -= 1;
                Some(ProviderError::transient(format!("throttled: {key}")))
            }
            None => None,
        }
    }

    fn object(&self, remote_id: &str) -> Option<Attrs> {
        self.objects.lock().unwrap().get(remote_id).cloned()
    }
}

struct FakeProvider {
    kind: &'static str,
    prefix: &'static str,
    schema: KindSchema,
    cloud: Arc<FakeCloud>,
    delay: Duration,
}

#[async_trait]
impl ResourceProvider for FakeProvider {
    fn kind(&self) -> &str {
        self.kind
    }

    fn schema(&self) -> KindSchema {
        self.schema.clone()
    }

    async fn create(&self, attrs: &Attrs) -> ProviderResult<Created> {
        if let Some(err) = self.cloud.take_failure(&format!("create:{}", self.kind)) {
            return Err(err);
        }
        self.cloud.push_log(format!("start create:{}", self.kind));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let remote_id = {
            let mut counter = self.cloud.counter.lock().unwrap();
            *counter += 1;
            format!("{}-{:06}", self.prefix, counter)
        };
        let mut stored = attrs.clone();
        stored.insert("id".to_string(), json!(remote_id));
        self.cloud
            .objects
            .lock()
            .unwrap()
            .insert(remote_id.clone(), stored.clone());
        self.cloud.push_log(format!("done create:{}", self.kind));
        Ok(Created { remote_id, attrs: stored })
    }

    async fn read(&self, remote_id: &str) -> ProviderResult<Option<Attrs>> {
        Ok(self.cloud.object(remote_id))
    }

    async fn update(&self, remote_id: &str, attrs: &Attrs) -> ProviderResult<Attrs> {
        if let Some(err) = self.cloud.take_failure(&format!("update:{}", self.kind)) {
            return Err(err);
        }
        let mut objects = self.cloud.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(remote_id) else {
            return Err(ProviderError::not_found(remote_id.to_string()));
        };
        for (key, value) in attrs {
            stored.insert(key.clone(), value.clone());
        }
        let result = stored.clone();
        drop(objects);
        self.cloud
            .push_log(format!("update:{}:{remote_id}", self.kind));
        Ok(result)
    }

    async fn delete(&self, remote_id: &str) -> ProviderResult<()> {
        if let Some(err) = self.cloud.take_failure(&format!("delete:{}", self.kind)) {
            return Err(err);
        }
        if self
            .cloud
            .objects
            .lock()
            .unwrap()
            .remove(remote_id)
            .is_none()
        {
            return Err(ProviderError::not_found(remote_id.to_string()));
        }
        self.cloud
            .push_log(format!("delete:{}:{remote_id}", self.kind));
        Ok(())
    }
}

fn registry(cloud: &Arc<FakeCloud>, delay: Duration) -> Arc<ProviderRegistry> {
    let kinds: [(&'static str, &'static str, KindSchema); 5] = [
        (
            "network",
            "net",
            KindSchema::new().with_replace_on_change(["cidr_block"]),
        ),
        (
            "subnet",
            "sub",
            KindSchema::new().with_replace_on_change(["network_id", "cidr_block"]),
        ),
        ("security_group", "sg", KindSchema::new()),
        (
            "key_pair",
            "key",
            KindSchema::new().with_replace_on_change(["public_key"]),
        ),
        (
            "instance",
            "srv",
            KindSchema::new().with_replace_on_change(["image", "subnet_id"]),
        ),
    ];
    let mut registry = ProviderRegistry::new();
    for (kind, prefix, schema) in kinds {
        registry.register(Arc::new(FakeProvider {
            kind,
            prefix,
            schema,
            cloud: cloud.clone(),
            delay,
        }));
    }
    Arc::new(registry)
}

fn web_stack() -> DeclarationSet {
    let mut decls = DeclarationSet::new();
    decls.add(
        ResourceDecl::new("network", "main")
            .with_attr("cidr_block", AttrValue::literal("10.0.0.0/16")),
    );
    decls.add(
        ResourceDecl::new("subnet", "public")
            .with_attr("network_id", AttrValue::reference("network", "main", "id"))
            .with_attr("cidr_block", AttrValue::literal("10.0.1.0/24")),
    );
    decls.add(
        ResourceDecl::new("security_group", "web")
            .with_attr("network_id", AttrValue::reference("network", "main", "id")),
    );
    decls.add(
        ResourceDecl::new("instance", "web")
            .with_attr("image", AttrValue::literal("ubuntu-24.04"))
            .with_attr("subnet_id", AttrValue::reference("subnet", "public", "id"))
            .with_attr(
                "security_group_ids",
                AttrValue::List(vec![AttrValue::reference("security_group", "web", "id")]),
            ),
    );
    decls
}

fn compute_plan(
    decls: &DeclarationSet,
    state: &GlobalState,
    registry: &ProviderRegistry,
) -> Plan {
    let graph = DependencyGraph::build(decls).unwrap();
    let diffs = diff(decls, &graph, state, &registry.schemas()).unwrap();
    plan(decls, &graph, &diffs, state).unwrap()
}

fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        backoff_multiplier: 2.0,
    }
}

async fn apply(
    decls: &DeclarationSet,
    state: &mut GlobalState,
    manager: &StateManager,
    registry: &Arc<ProviderRegistry>,
    max_parallel: usize,
) -> ApplyReport {
    let plan = compute_plan(decls, state, registry);
    Executor::new(registry.clone())
        .with_max_parallel(max_parallel)
        .with_retry_config(quick_retry())
        .apply(&plan, state, manager)
        .await
        .unwrap()
}

#[tokio::test]
async fn apply_creates_the_whole_stack_with_references_resolved() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);
    let decls = web_stack();
    let mut state = GlobalState::new();

    let report = apply(&decls, &mut state, &manager, &registry, 1).await;
    assert!(report.is_success());
    assert_eq!(report.succeeded(), 4);
    assert_eq!(state.len(), 4);

    // The instance's pending references were substituted with the producer
    // ids assigned during this same run.
    let subnet = state.get(&ResourceId::new("subnet", "public")).unwrap();
    let instance = state.get(&ResourceId::new("instance", "web")).unwrap();
    assert_eq!(
        instance.inputs.get("subnet_id"),
        Some(&json!(subnet.remote_id))
    );
    assert_eq!(
        instance.dependencies,
        vec![
            ResourceId::new("security_group", "web"),
            ResourceId::new("subnet", "public"),
        ]
    );

    // Durable state matches in-memory state.
    let reloaded = manager.load().await.unwrap();
    assert_eq!(reloaded.len(), 4);
}

#[tokio::test]
async fn second_apply_is_pure_noop() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);
    let decls = web_stack();
    let mut state = GlobalState::new();

    apply(&decls, &mut state, &manager, &registry, 4).await;

    let second = compute_plan(&decls, &state, &registry);
    assert!(!second.has_changes());
    assert!(second.items.iter().all(|i| i.action == ActionType::NoOp));
}

#[tokio::test]
async fn failure_halts_and_reports_unattempted_items() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);
    let decls = web_stack();
    let mut state = GlobalState::new();

    cloud.fail("create:security_group", Failure::Permanent);
    let report = apply(&decls, &mut state, &manager, &registry, 1).await;

    assert!(!report.is_success());
    assert_eq!(report.succeeded(), 2); // network, subnet
    assert_eq!(report.failed(), 1);
    assert_eq!(report.not_attempted(), 1); // instance

    let failure = report.first_failure().unwrap();
    assert_eq!(failure.resource, ResourceId::new("security_group", "web"));

    // State reflects exactly the committed prefix.
    assert!(state.contains(&ResourceId::new("network", "main")));
    assert!(state.contains(&ResourceId::new("subnet", "public")));
    assert!(!state.contains(&ResourceId::new("security_group", "web")));
    assert!(!state.contains(&ResourceId::new("instance", "web")));

    // Re-planning covers only the remainder.
    cloud.failures.lock().unwrap().clear();
    let recovery = compute_plan(&decls, &state, &registry);
    assert_eq!(recovery.summary().create, 2);
    assert_eq!(recovery.summary().unchanged, 2);

    let report = apply(&decls, &mut state, &manager, &registry, 1).await;
    assert!(report.is_success());
    assert_eq!(state.len(), 4);
}

#[tokio::test]
async fn transient_errors_retry_until_success() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);
    let mut decls = DeclarationSet::new();
    decls.add(
        ResourceDecl::new("network", "main")
            .with_attr("cidr_block", AttrValue::literal("10.0.0.0/16")),
    );
    let mut state = GlobalState::new();

    cloud.fail("create:network", Failure::Transient(2));
    let report = apply(&decls, &mut state, &manager, &registry, 1).await;
    assert!(report.is_success());
    assert_eq!(state.len(), 1);
}

#[tokio::test]
async fn transient_errors_escalate_after_bounded_attempts() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);
    let mut decls = DeclarationSet::new();
    decls.add(
        ResourceDecl::new("network", "main")
            .with_attr("cidr_block", AttrValue::literal("10.0.0.0/16")),
    );
    let mut state = GlobalState::new();

    cloud.fail("create:network", Failure::Transient(10));
    let report = apply(&decls, &mut state, &manager, &registry, 1).await;
    assert!(!report.is_success());
    match &report.outcomes[0].status {
        ItemStatus::Failed { error } => assert!(error.contains("giving up")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(state.is_empty());
}

#[tokio::test]
async fn replacement_destroys_old_and_creates_new() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);
    let mut decls = DeclarationSet::new();
    decls.add(
        ResourceDecl::new("network", "main")
            .with_attr("cidr_block", AttrValue::literal("10.0.0.0/16")),
    );
    let mut state = GlobalState::new();
    apply(&decls, &mut state, &manager, &registry, 1).await;
    let old_id = state
        .get(&ResourceId::new("network", "main"))
        .unwrap()
        .remote_id
        .clone();

    let mut changed = DeclarationSet::new();
    changed.add(
        ResourceDecl::new("network", "main")
            .with_attr("cidr_block", AttrValue::literal("10.9.0.0/16")),
    );
    let replace_plan = compute_plan(&changed, &state, &registry);
    assert_eq!(replace_plan.summary().destroy, 1);
    assert_eq!(replace_plan.summary().create, 1);

    let report = apply(&changed, &mut state, &manager, &registry, 1).await;
    assert!(report.is_success());

    let record = state.get(&ResourceId::new("network", "main")).unwrap();
    assert_ne!(record.remote_id, old_id);
    assert!(cloud.object(&old_id).is_none());
    assert!(cloud.object(&record.remote_id).is_some());

    // Old object went away before the successor appeared.
    let delete_pos = cloud.log_position(&format!("delete:network:{old_id}"));
    let create_pos = cloud.log_position("start create:network");
    let second_create = cloud
        .log_entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| *e == "start create:network")
        .map(|(i, _)| i)
        .max()
        .unwrap();
    assert!(create_pos <= second_create);
    assert!(delete_pos < second_create);
}

#[tokio::test]
async fn create_before_destroy_keeps_successor_record() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);

    let mut decls = DeclarationSet::new();
    decls.add(
        ResourceDecl::new("key_pair", "deploy")
            .with_attr("public_key", AttrValue::literal("ssh-ed25519 OLD"))
            .with_create_before_destroy(),
    );
    let mut state = GlobalState::new();
    apply(&decls, &mut state, &manager, &registry, 1).await;
    let old_id = state
        .get(&ResourceId::new("key_pair", "deploy"))
        .unwrap()
        .remote_id
        .clone();

    let mut changed = DeclarationSet::new();
    changed.add(
        ResourceDecl::new("key_pair", "deploy")
            .with_attr("public_key", AttrValue::literal("ssh-ed25519 NEW"))
            .with_create_before_destroy(),
    );
    let report = apply(&changed, &mut state, &manager, &registry, 1).await;
    assert!(report.is_success());

    // The new object was created before the old one was deleted, and the
    // surviving record points at the successor.
    let record = state.get(&ResourceId::new("key_pair", "deploy")).unwrap();
    assert_ne!(record.remote_id, old_id);
    assert!(cloud.object(&old_id).is_none());
    assert!(cloud.object(&record.remote_id).is_some());

    let delete_pos = cloud.log_position(&format!("delete:key_pair:{old_id}"));
    let creates: Vec<usize> = cloud
        .log_entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| *e == "done create:key_pair")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(creates.len(), 2);
    assert!(creates[1] < delete_pos);
}

#[tokio::test]
async fn destroy_everything_walks_reverse_dependency_order() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);
    let decls = web_stack();
    let mut state = GlobalState::new();
    apply(&decls, &mut state, &manager, &registry, 4).await;

    let report = apply(
        &DeclarationSet::new(),
        &mut state,
        &manager,
        &registry,
        4,
    )
    .await;
    assert!(report.is_success());
    assert!(state.is_empty());
    assert!(cloud.objects.lock().unwrap().is_empty());

    let entries = cloud.log_entries();
    let pos = |prefix: &str| {
        entries
            .iter()
            .position(|e| e.starts_with(prefix))
            .unwrap_or_else(|| panic!("no entry '{prefix}'"))
    };
    assert!(pos("delete:instance") < pos("delete:subnet"));
    assert!(pos("delete:instance") < pos("delete:security_group"));
    assert!(pos("delete:subnet") < pos("delete:network"));
    assert!(pos("delete:security_group") < pos("delete:network"));
}

#[tokio::test]
async fn parallel_apply_still_commits_producers_first() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::from_millis(15));
    let decls = web_stack();
    let mut state = GlobalState::new();

    let report = apply(&decls, &mut state, &manager, &registry, 4).await;
    assert!(report.is_success());

    let entries = cloud.log_entries();
    let pos = |entry: &str| {
        entries
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("no entry '{entry}' in {entries:?}"))
    };
    assert!(pos("done create:network") < pos("start create:subnet"));
    assert!(pos("done create:network") < pos("start create:security_group"));
    assert!(pos("done create:subnet") < pos("start create:instance"));
    assert!(pos("done create:security_group") < pos("start create:instance"));
}

#[tokio::test]
async fn cancelled_run_issues_no_calls() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);
    let decls = web_stack();
    let mut state = GlobalState::new();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let plan = compute_plan(&decls, &state, &registry);
    let report = Executor::new(registry.clone())
        .with_cancellation(cancel)
        .apply(&plan, &mut state, &manager)
        .await
        .unwrap();

    assert_eq!(report.not_attempted(), 4);
    assert!(cloud.log_entries().is_empty());
    assert!(state.is_empty());
}

#[tokio::test]
async fn refresh_drops_vanished_objects_and_replan_recreates_them() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);
    let decls = web_stack();
    let mut state = GlobalState::new();
    apply(&decls, &mut state, &manager, &registry, 4).await;

    // Someone deletes the instance behind the engine's back.
    let instance_id = state
        .get(&ResourceId::new("instance", "web"))
        .unwrap()
        .remote_id
        .clone();
    cloud.objects.lock().unwrap().remove(&instance_id);

    refresh_state(&registry, &mut state, &manager).await.unwrap();
    assert!(!state.contains(&ResourceId::new("instance", "web")));
    assert_eq!(state.len(), 3);

    let recovery = compute_plan(&decls, &state, &registry);
    assert_eq!(recovery.summary().create, 1);
    assert_eq!(recovery.summary().unchanged, 3);
}

#[tokio::test]
async fn outputs_resolve_after_apply_and_redact_sensitive_values() {
    let temp = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp.path());
    let cloud = Arc::new(FakeCloud::default());
    let registry = registry(&cloud, Duration::ZERO);

    let mut decls = DeclarationSet::new();
    decls.add(
        ResourceDecl::new("key_pair", "deploy")
            .with_attr("public_key", AttrValue::literal("ssh-ed25519 AAAA")),
    );
    decls.outputs.push(converge_core::OutputDecl {
        name: "key_id".into(),
        source: converge_core::Reference::parse("key_pair.deploy.id").unwrap(),
        sensitive: false,
    });
    decls.outputs.push(converge_core::OutputDecl {
        name: "key_material".into(),
        source: converge_core::Reference::parse("key_pair.deploy.public_key").unwrap(),
        sensitive: true,
    });

    let mut state = GlobalState::new();
    let report = apply(&decls, &mut state, &manager, &registry, 1).await;
    assert!(report.is_success());

    let outputs = resolve_outputs(&decls.outputs, &state).unwrap();
    let report = report.with_outputs(outputs.clone());

    let rendered = outputs.to_string();
    assert!(rendered.contains("key_id = key-000001"));
    assert!(rendered.contains("key_material = (sensitive)"));
    assert!(!rendered.contains("AAAA"));

    // Structured report keeps the raw value.
    let structured = serde_json::to_value(&report).unwrap();
    assert_eq!(
        structured["outputs"]["outputs"][1]["value"],
        json!("ssh-ed25519 AAAA")
    );
}
