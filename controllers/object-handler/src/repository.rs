//! Object repository
//!
//! The controller's view of the cluster: get/list/patch for ObjectHandler
//! instances, get for arbitrary target objects and Secrets. The trait is the
//! seam between the reconciler and the Kubernetes API, so reconcile logic can
//! be tested against an in-memory repository.

use crate::error::ControllerError;
use crds::ObjectHandler;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ListParams, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{self, Scope};
use kube::{Api, Client};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Cluster access used by the reconciler and handler strategies
#[async_trait::async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Fetch an ObjectHandler; `None` if it does not exist
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<ObjectHandler>, ControllerError>;

    /// List all ObjectHandlers visible to the controller
    async fn list_instances(&self) -> Result<Vec<ObjectHandler>, ControllerError>;

    /// Fetch an object of any kind; `namespace` is ignored for cluster-scoped kinds
    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ControllerError>;

    /// Fetch a Secret; `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError>;

    /// Apply a JSON merge patch to an ObjectHandler's status subresource
    async fn patch_instance_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ControllerError>;
}

/// Discovery results per kind: the API resource and whether it is namespaced.
///
/// Shared by the repository and the dynamic watch source so each kind is
/// discovered once.
pub struct KindCache {
    client: Client,
    kinds: RwLock<HashMap<GroupVersionKind, (ApiResource, bool)>>,
}

impl std::fmt::Debug for KindCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindCache").finish_non_exhaustive()
    }
}

impl KindCache {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kinds: RwLock::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolve a kind through API discovery, caching the result
    pub async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool), ControllerError> {
        let cached = self.kinds.read().unwrap_or_else(PoisonError::into_inner).get(gvk).cloned();
        if let Some(found) = cached {
            return Ok(found);
        }

        let (resource, capabilities) = discovery::pinned_kind(&self.client, gvk).await?;
        let namespaced = matches!(capabilities.scope, Scope::Namespaced);
        debug!("Discovered {}/{} {} (namespaced: {})", gvk.group, gvk.version, gvk.kind, namespaced);

        self.kinds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(gvk.clone(), (resource.clone(), namespaced));
        Ok((resource, namespaced))
    }

    /// Dynamic API for a kind, scoped to `namespace` when the kind is namespaced
    pub async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, ControllerError> {
        let (resource, namespaced) = self.resolve(gvk).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }
}

/// `ObjectRepository` backed by the Kubernetes API
#[derive(Debug)]
pub struct KubeRepository {
    kinds: Arc<KindCache>,
    watch_namespace: Option<String>,
}

impl KubeRepository {
    pub fn new(kinds: Arc<KindCache>, watch_namespace: Option<String>) -> Self {
        Self { kinds, watch_namespace }
    }

    fn instances(&self, namespace: &str) -> Api<ObjectHandler> {
        Api::namespaced(self.kinds.client().clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ObjectRepository for KubeRepository {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<ObjectHandler>, ControllerError> {
        Ok(self.instances(namespace).get_opt(name).await?)
    }

    async fn list_instances(&self) -> Result<Vec<ObjectHandler>, ControllerError> {
        let api: Api<ObjectHandler> = match &self.watch_namespace {
            Some(ns) => Api::namespaced(self.kinds.client().clone(), ns),
            None => Api::all(self.kinds.client().clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ControllerError> {
        let api = self.kinds.api(gvk, Some(namespace)).await?;
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.kinds.client().clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_instance_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), ControllerError> {
        self.instances(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}
