//! Test utilities for unit testing reconcilers
//!
//! In-memory stand-ins for the cluster, the watch source and the GitLab
//! connector, plus builders for ObjectHandler instances and target objects.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::handlers::{GitlabConnector, GitlabHandlerFactory};
use crate::index::ReferenceIndex;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::registry::{TriggerMapper, WatchRegistry, WatchSource};
use crate::repository::ObjectRepository;
use crds::*;
use futures::channel::mpsc::{self, UnboundedReceiver};
use gitlab_client::{GitlabClientTrait, MockGitlabClient};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube_runtime::reflector::ObjectRef;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type ObjectKey = (GroupVersionKind, String, String);

/// In-memory repository; clones share state
#[derive(Clone, Default)]
pub struct MockRepository {
    instances: Arc<Mutex<BTreeMap<(String, String), ObjectHandler>>>,
    objects: Arc<Mutex<HashMap<ObjectKey, DynamicObject>>>,
    secrets: Arc<Mutex<HashMap<(String, String), Secret>>>,
    patches: Arc<AtomicUsize>,
    fail_patches: Arc<AtomicBool>,
}

impl MockRepository {
    pub fn add_instance(&self, instance: ObjectHandler) {
        let key = (
            instance.metadata.namespace.clone().unwrap_or_default(),
            instance.metadata.name.clone().unwrap_or_default(),
        );
        lock(&self.instances).insert(key, instance);
    }

    pub fn instance(&self, namespace: &str, name: &str) -> Option<ObjectHandler> {
        lock(&self.instances)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Current status of an instance, empty if it has none
    pub fn status(&self, namespace: &str, name: &str) -> ObjectHandlerStatus {
        self.instance(namespace, name)
            .and_then(|i| i.status)
            .unwrap_or_default()
    }

    /// Change an instance's spec, keeping its status
    pub fn update_spec(&self, namespace: &str, name: &str, update: impl FnOnce(&mut ObjectHandlerSpec)) {
        let mut instances = lock(&self.instances);
        let instance = instances
            .get_mut(&(namespace.to_string(), name.to_string()))
            .expect("instance exists");
        update(&mut instance.spec);
        instance.metadata.generation = Some(instance.metadata.generation.unwrap_or(0) + 1);
    }

    /// Drop an instance's status, as if it had been recreated
    pub fn clear_status(&self, namespace: &str, name: &str) {
        if let Some(instance) = lock(&self.instances).get_mut(&(namespace.to_string(), name.to_string())) {
            instance.status = None;
        }
    }

    pub fn add_object(&self, gvk: &GroupVersionKind, object: DynamicObject) {
        let key = (
            gvk.clone(),
            object.metadata.namespace.clone().unwrap_or_default(),
            object.metadata.name.clone().unwrap_or_default(),
        );
        lock(&self.objects).insert(key, object);
    }

    pub fn remove_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) {
        lock(&self.objects).remove(&(gvk.clone(), namespace.to_string(), name.to_string()));
    }

    pub fn add_secret(&self, secret: Secret) {
        let key = (
            secret.metadata.namespace.clone().unwrap_or_default(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        lock(&self.secrets).insert(key, secret);
    }

    /// Number of status patches applied
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn fail_patches(&self, fail: bool) {
        self.fail_patches.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ObjectRepository for MockRepository {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<ObjectHandler>, ControllerError> {
        Ok(self.instance(namespace, name))
    }

    async fn list_instances(&self) -> Result<Vec<ObjectHandler>, ControllerError> {
        Ok(lock(&self.instances).values().cloned().collect())
    }

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ControllerError> {
        Ok(lock(&self.objects)
            .get(&(gvk.clone(), namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(lock(&self.secrets)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn patch_instance_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ControllerError> {
        if self.fail_patches.load(Ordering::SeqCst) {
            return Err(ControllerError::Timeout("injected patch failure".to_string()));
        }
        let status: ObjectHandlerStatus = serde_json::from_value(patch["status"].clone())?;
        let mut instances = lock(&self.instances);
        let instance = instances
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ControllerError::TargetNotFound(format!("{namespace}/{name}")))?;
        instance.status = Some(status);
        self.patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Watch source that records subscriptions instead of talking to a cluster
#[derive(Default)]
pub struct CountingWatchSource {
    subscriptions: Mutex<HashMap<GroupVersionKind, usize>>,
    mappers: Mutex<HashMap<GroupVersionKind, TriggerMapper>>,
    failures_left: AtomicUsize,
}

impl CountingWatchSource {
    /// Fail the first `failures` subscription attempts
    pub fn failing(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    /// Subscription attempts for a kind, failed ones included
    pub fn subscriptions(&self, gvk: &GroupVersionKind) -> usize {
        lock(&self.subscriptions).get(gvk).copied().unwrap_or(0)
    }

    /// The mapper handed to the last successful subscription for a kind
    pub fn mapper(&self, gvk: &GroupVersionKind) -> Option<TriggerMapper> {
        lock(&self.mappers).get(gvk).cloned()
    }
}

#[async_trait::async_trait]
impl WatchSource for CountingWatchSource {
    async fn subscribe(&self, gvk: &GroupVersionKind, mapper: TriggerMapper) -> Result<JoinHandle<()>, ControllerError> {
        *lock(&self.subscriptions).entry(gvk.clone()).or_insert(0) += 1;
        // widen the window for racing callers
        tokio::time::sleep(Duration::from_millis(10)).await;

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ControllerError::Watch("injected discovery failure".to_string()));
        }

        lock(&self.mappers).insert(gvk.clone(), mapper);
        Ok(tokio::spawn(std::future::pending::<()>()))
    }
}

/// Connector that hands out clones of one mock client
#[derive(Clone)]
pub struct MockConnector {
    client: MockGitlabClient,
}

impl MockConnector {
    pub fn new(client: MockGitlabClient) -> Self {
        Self { client }
    }
}

impl GitlabConnector for MockConnector {
    fn connect(&self, _api: &str, _token: Option<String>) -> Result<Arc<dyn GitlabClientTrait>, ControllerError> {
        Ok(Arc::new(self.client.clone()))
    }
}

/// A reconciler wired to in-memory collaborators
pub struct Harness {
    pub repository: MockRepository,
    pub gitlab: MockGitlabClient,
    pub source: Arc<CountingWatchSource>,
    pub index: Arc<ReferenceIndex>,
    pub metrics: Metrics,
    pub reconciler: Arc<Reconciler>,
    pub triggers: UnboundedReceiver<ObjectRef<ObjectHandler>>,
}

pub fn harness() -> Harness {
    harness_with_source(CountingWatchSource::default())
}

pub fn harness_with_source(source: CountingWatchSource) -> Harness {
    let repository = MockRepository::default();
    let gitlab = MockGitlabClient::new("https://gitlab.example.com");
    let source = Arc::new(source);
    let index = Arc::new(ReferenceIndex::default());
    let metrics = Metrics::new().expect("metrics");
    let (sender, triggers) = mpsc::unbounded();
    let config = ControllerConfig::from_lookup(|_| None).expect("default config");

    let registry = Arc::new(WatchRegistry::new(
        Arc::clone(&source) as Arc<dyn WatchSource>,
        Arc::clone(&index),
        sender,
        metrics.clone(),
    ));
    let factory = Arc::new(GitlabHandlerFactory::new(
        Arc::new(repository.clone()),
        Arc::new(MockConnector::new(gitlab.clone())),
        config.gitlab_api_url.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(repository.clone()),
        registry,
        Arc::clone(&index),
        factory,
        metrics.clone(),
        &config,
    ));

    Harness {
        repository,
        gitlab,
        source,
        index,
        metrics,
        reconciler,
        triggers,
    }
}

pub fn deployment_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("apps", "v1", "Deployment")
}

/// ObjectHandler targeting the Deployment `target_name` in its own namespace
pub fn test_instance(namespace: &str, name: &str, target_name: &str, handlers: Vec<HandlerSpec>) -> ObjectHandler {
    let mut instance = ObjectHandler::new(
        name,
        ObjectHandlerSpec {
            for_object: TargetObjectRef::new("apps", "v1", "Deployment", target_name),
            handlers,
            interval: "30s".to_string(),
        },
    );
    instance.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        generation: Some(1),
        ..Default::default()
    };
    instance
}

/// Deployment with an `Available` condition
pub fn deployment(namespace: &str, name: &str, ready: bool) -> DynamicObject {
    let (status, reason) = if ready {
        ("True", "MinimumReplicasAvailable")
    } else {
        ("False", "MinimumReplicasUnavailable")
    };
    DynamicObject::new(name, &ApiResource::from_gvk(&deployment_gvk()))
        .within(namespace)
        .data(json!({
            "spec": {"replicas": 1},
            "status": {"conditions": [{
                "type": "Available",
                "status": status,
                "reason": reason,
                "message": format!("Deployment availability is {status}"),
            }]}
        }))
}

pub fn test_secret(namespace: &str, name: &str, key: &str, value: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(key.to_string(), ByteString(value.as_bytes().to_vec()))])),
        ..Default::default()
    }
}

pub fn gitlab_ref(project: &str, merge_request_id: u64, state: Option<&str>) -> GitlabMergeRequestRef {
    GitlabMergeRequestRef {
        project: project.to_string(),
        merge_request_id,
        api: None,
        token_ref: None,
        pull_request_state: state.map(str::to_string),
    }
}

pub fn comment_handler(project: &str, merge_request_id: u64, state: Option<&str>) -> HandlerSpec {
    HandlerSpec {
        pull_request_comment: Some(PullRequestCommentHandler {
            gitlab: gitlab_ref(project, merge_request_id, state),
        }),
        ..Default::default()
    }
}

pub fn approve_handler(project: &str, merge_request_id: u64, state: Option<&str>) -> HandlerSpec {
    HandlerSpec {
        pull_request_approve: Some(PullRequestApproveHandler {
            gitlab: gitlab_ref(project, merge_request_id, state),
        }),
        ..Default::default()
    }
}
