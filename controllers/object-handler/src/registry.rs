//! Dynamic watch registry
//!
//! Target kinds are only known at runtime, from the `forObject` references of
//! ObjectHandler instances. The registry starts one watch per kind the first
//! time a kind is referenced and routes every change seen by that watch to
//! the referencing instances through the reference index.
//!
//! The check-and-subscribe sequence runs under a single lock, so concurrent
//! reconciles that discover the same kind create exactly one subscription. A
//! failed subscription leaves no entry behind and the next reconcile retries.

use crate::error::ControllerError;
use crate::index::ReferenceIndex;
use crate::metrics::Metrics;
use crate::repository::KindCache;
use crds::ObjectHandler;
use futures::StreamExt;
use futures::channel::mpsc::UnboundedSender;
use kube::ResourceExt;
use kube::core::GroupVersionKind;
use kube_runtime::WatchStreamExt;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sending half of the reconcile trigger channel
pub type TriggerSender = UnboundedSender<ObjectRef<ObjectHandler>>;

/// Maps a change on a target object to reconcile requests for the instances
/// that reference it
#[derive(Debug, Clone)]
pub struct TriggerMapper {
    gvk: GroupVersionKind,
    index: Arc<ReferenceIndex>,
    sender: TriggerSender,
}

impl TriggerMapper {
    pub fn new(gvk: GroupVersionKind, index: Arc<ReferenceIndex>, sender: TriggerSender) -> Self {
        Self { gvk, index, sender }
    }

    /// Enqueue one reconcile per instance referencing `namespace/name`.
    ///
    /// Objects without a namespace belong to cluster-scoped kinds. Returns the
    /// number of requests enqueued.
    pub fn notify(&self, namespace: Option<&str>, name: &str) -> usize {
        let instances = match namespace {
            Some(ns) => self.index.lookup(&self.gvk, ns, name),
            None => self.index.lookup_cluster_scoped(&self.gvk, name),
        };

        let mut sent = 0;
        for instance in instances {
            let request = ObjectRef::new(&instance.name).within(&instance.namespace);
            if self.sender.unbounded_send(request).is_err() {
                debug!("Trigger channel closed, dropping request for {}", instance);
                break;
            }
            sent += 1;
        }
        sent
    }
}

/// Creates the underlying subscription for a kind
#[async_trait::async_trait]
pub trait WatchSource: Send + Sync {
    /// Start watching `gvk`, calling `mapper` for every changed object.
    ///
    /// Returns once the subscription is registered; the watch itself runs in
    /// the returned task.
    async fn subscribe(&self, gvk: &GroupVersionKind, mapper: TriggerMapper) -> Result<JoinHandle<()>, ControllerError>;
}

/// Watches target kinds through the Kubernetes API
#[derive(Debug)]
pub struct KubeWatchSource {
    kinds: Arc<KindCache>,
    namespace: Option<String>,
}

impl KubeWatchSource {
    pub fn new(kinds: Arc<KindCache>, namespace: Option<String>) -> Self {
        Self { kinds, namespace }
    }
}

#[async_trait::async_trait]
impl WatchSource for KubeWatchSource {
    async fn subscribe(&self, gvk: &GroupVersionKind, mapper: TriggerMapper) -> Result<JoinHandle<()>, ControllerError> {
        let api = self.kinds.api(gvk, self.namespace.as_deref()).await?;
        let kind = gvk.kind.clone();

        Ok(tokio::spawn(async move {
            let mut objects = watcher(api, watcher::Config::default())
                .default_backoff()
                .touched_objects()
                .boxed();
            while let Some(object) = objects.next().await {
                match object {
                    Ok(object) => {
                        let name = object.name_any();
                        let sent = mapper.notify(object.namespace().as_deref(), &name);
                        if sent > 0 {
                            debug!("{} {} changed, triggered {} ObjectHandler(s)", kind, name, sent);
                        }
                    }
                    Err(e) => warn!("{} watch error: {}", kind, e),
                }
            }
            warn!("{} watch stream ended", kind);
        }))
    }
}

/// An active subscription; the watch task stops when this is dropped
#[derive(Debug)]
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Tracks which target kinds are watched
pub struct WatchRegistry {
    source: Arc<dyn WatchSource>,
    index: Arc<ReferenceIndex>,
    sender: TriggerSender,
    metrics: Metrics,
    watches: Mutex<HashMap<GroupVersionKind, WatchHandle>>,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry").finish_non_exhaustive()
    }
}

impl WatchRegistry {
    pub fn new(
        source: Arc<dyn WatchSource>,
        index: Arc<ReferenceIndex>,
        sender: TriggerSender,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            index,
            sender,
            metrics,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Make sure `gvk` is watched; subscribes at most once per kind
    pub async fn ensure_watch(&self, gvk: &GroupVersionKind) -> Result<(), ControllerError> {
        let mut watches = self.watches.lock().await;
        if watches.contains_key(gvk) {
            return Ok(());
        }

        let mapper = TriggerMapper::new(gvk.clone(), Arc::clone(&self.index), self.sender.clone());
        let task = self
            .source
            .subscribe(gvk, mapper)
            .await
            .map_err(|e| ControllerError::Watch(format!("{}/{} {}: {}", gvk.group, gvk.version, gvk.kind, e)))?;

        watches.insert(gvk.clone(), WatchHandle { task });
        self.metrics.watched_kinds.set(i64::try_from(watches.len()).unwrap_or(i64::MAX));
        info!("Watching {}/{} {}", gvk.group, gvk.version, gvk.kind);
        Ok(())
    }

    pub async fn is_watching(&self, gvk: &GroupVersionKind) -> bool {
        self.watches.lock().await.contains_key(gvk)
    }

    /// Number of watched kinds
    pub async fn len(&self) -> usize {
        self.watches.lock().await.len()
    }
}
