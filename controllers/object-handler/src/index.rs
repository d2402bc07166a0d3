//! Reference index
//!
//! Maps the identity of a target object to the ObjectHandler instances whose
//! `forObject` resolves to it, so a change on a target can be routed back to
//! its instances without scanning every instance.
//!
//! Keys are built from length-prefixed components (`<len>:<value>` for group,
//! version, kind, namespace and name), so separators inside a component can
//! never make two different identities collide. The namespace default rule
//! (`forObject.namespace` falls back to the instance's namespace) is applied
//! when indexing and the caller applies no rule when querying: events carry
//! the object's real namespace.

use crds::ObjectHandler;
use kube::ResourceExt;
use kube::core::GroupVersionKind;
use kube_runtime::watcher::Event;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Identity of an ObjectHandler instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl InstanceKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Key of an instance; `None` for objects without a namespace
    pub fn of(instance: &ObjectHandler) -> Option<Self> {
        let namespace = instance.namespace()?;
        Some(Self {
            namespace,
            name: instance.name_any(),
        })
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn encode(parts: &[&str]) -> String {
    let mut key = String::new();
    for part in parts {
        let _ = write!(key, "{}:{}", part.len(), part);
    }
    key
}

/// Index key of a target object identity
pub fn target_key(gvk: &GroupVersionKind, namespace: &str, name: &str) -> String {
    encode(&[&gvk.group, &gvk.version, &gvk.kind, namespace, name])
}

/// Namespace-less key, used to route events of cluster-scoped kinds
fn name_key(gvk: &GroupVersionKind, name: &str) -> String {
    encode(&[&gvk.group, &gvk.version, &gvk.kind, name])
}

/// Index key of the target an instance references
pub fn index_key(instance: &ObjectHandler) -> Option<String> {
    let namespace = instance.namespace()?;
    let target = &instance.spec.for_object;
    Some(target_key(
        &target.group_version_kind(),
        target.resolved_namespace(&namespace),
        &target.name,
    ))
}

#[derive(Debug)]
struct Indexed {
    target: String,
    name: String,
}

#[derive(Debug, Default)]
struct IndexState {
    by_target: HashMap<String, BTreeSet<InstanceKey>>,
    by_name: HashMap<String, BTreeSet<InstanceKey>>,
    by_instance: HashMap<InstanceKey, Indexed>,
    /// Instances seen since the last `Init`, while a relist is in progress
    relisted: Option<HashSet<InstanceKey>>,
}

fn unlink(map: &mut HashMap<String, BTreeSet<InstanceKey>>, key: &str, instance: &InstanceKey) {
    if let Some(set) = map.get_mut(key) {
        set.remove(instance);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

impl IndexState {
    fn remove(&mut self, instance: &InstanceKey) {
        if let Some(old) = self.by_instance.remove(instance) {
            unlink(&mut self.by_target, &old.target, instance);
            unlink(&mut self.by_name, &old.name, instance);
        }
    }

    fn upsert(&mut self, instance: &ObjectHandler) {
        let (Some(key), Some(target)) = (InstanceKey::of(instance), index_key(instance)) else {
            return;
        };
        let reference = &instance.spec.for_object;
        let name = name_key(&reference.group_version_kind(), &reference.name);

        if let Some(existing) = self.by_instance.get(&key)
            && existing.target == target
        {
            return;
        }

        self.remove(&key);
        self.by_target.entry(target.clone()).or_default().insert(key.clone());
        self.by_name.entry(name.clone()).or_default().insert(key.clone());
        self.by_instance.insert(key, Indexed { target, name });
    }
}

/// Concurrency-safe reference index
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    state: RwLock<IndexState>,
}

impl ReferenceIndex {
    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// (Re)index an instance from its current `forObject`
    pub fn upsert(&self, instance: &ObjectHandler) {
        self.write().upsert(instance);
    }

    /// Drop an instance from the index
    pub fn remove(&self, instance: &InstanceKey) {
        self.write().remove(instance);
    }

    /// Instances referencing the object `namespace/name` of kind `gvk`
    pub fn lookup(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Vec<InstanceKey> {
        self.read()
            .by_target
            .get(&target_key(gvk, namespace, name))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Instances referencing a cluster-scoped object, whatever namespace
    /// their reference resolved to
    pub fn lookup_cluster_scoped(&self, gvk: &GroupVersionKind, name: &str) -> Vec<InstanceKey> {
        self.read()
            .by_name
            .get(&name_key(gvk, name))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of indexed instances
    pub fn len(&self) -> usize {
        self.read().by_instance.len()
    }

    /// Keep the index in step with the ObjectHandler watch stream.
    ///
    /// A relist (`Init` .. `InitDone`) drops instances that were not listed
    /// again, covering deletions missed while the watch was down. Returns the
    /// instances dropped by this event.
    pub fn apply_event(&self, event: &Event<ObjectHandler>) -> Vec<InstanceKey> {
        let mut state = self.write();
        match event {
            Event::Apply(instance) => {
                state.upsert(instance);
                Vec::new()
            }
            Event::Delete(instance) => {
                let Some(key) = InstanceKey::of(instance) else {
                    return Vec::new();
                };
                state.remove(&key);
                vec![key]
            }
            Event::Init => {
                state.relisted = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(instance) => {
                state.upsert(instance);
                if let (Some(key), Some(seen)) = (InstanceKey::of(instance), state.relisted.as_mut()) {
                    seen.insert(key);
                }
                Vec::new()
            }
            Event::InitDone => {
                let Some(seen) = state.relisted.take() else {
                    return Vec::new();
                };
                let stale: Vec<InstanceKey> =
                    state.by_instance.keys().filter(|k| !seen.contains(k)).cloned().collect();
                for key in &stale {
                    debug!("Dropping {} from reference index after relist", key);
                    state.remove(key);
                }
                stale
            }
        }
    }
}
