//! Reconciliation logic for ObjectHandler resources.
//!
//! One pass per trigger: fetch the instance, make sure its target kind is
//! watched, fetch the target, run the handler pipeline, and write conditions
//! and handler records back with a single merge patch against the snapshot
//! read at the start of the pass.
//!
//! Outcome of a pass:
//! - instance gone: nothing to do, wait for the next change
//! - target missing, configuration error, handler failures: Ready=False is
//!   persisted and the instance is requeued after its interval
//! - watch registration, API errors, timeouts, status patch failure: the
//!   error goes back to the controller, which retries with backoff

pub mod pipeline;

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::handlers::{HandlerFactory, Target};
use crate::index::{InstanceKey, ReferenceIndex};
use crate::metrics::Metrics;
use crate::reconcile_helpers::{create_status_patch, resource_key, status_needs_update};
use crate::registry::WatchRegistry;
use crate::repository::ObjectRepository;
use chrono::Utc;
use crds::{Condition, ObjectHandler, ObjectHandlerStatus, set_condition};
use kube_runtime::controller::Action;
use kube_runtime::watcher::Event;
use pipeline::{resolve_handlers, run_pipeline};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue interval when `spec.interval` cannot be parsed
const FALLBACK_INTERVAL: Duration = Duration::from_secs(30);

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(Duration::from_secs(5), Duration::from_secs(300)),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles ObjectHandler resources.
pub struct Reconciler {
    repository: Arc<dyn ObjectRepository>,
    registry: Arc<WatchRegistry>,
    index: Arc<ReferenceIndex>,
    factory: Arc<dyn HandlerFactory>,
    metrics: Metrics,
    request_timeout: Duration,
    handler_timeout: Duration,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("request_timeout", &self.request_timeout)
            .field("handler_timeout", &self.handler_timeout)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        repository: Arc<dyn ObjectRepository>,
        registry: Arc<WatchRegistry>,
        index: Arc<ReferenceIndex>,
        factory: Arc<dyn HandlerFactory>,
        metrics: Metrics,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            repository,
            registry,
            index,
            factory,
            metrics,
            request_timeout: config.request_timeout,
            handler_timeout: config.handler_timeout,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Index every existing instance before the controller starts, so target
    /// events arriving early are routed.
    pub async fn prime_index(&self) -> Result<usize, ControllerError> {
        let instances = self.bounded("list ObjectHandlers", self.repository.list_instances()).await?;
        for instance in &instances {
            self.index.upsert(instance);
        }
        Ok(instances.len())
    }

    /// Apply an ObjectHandler watch event to the reference index and drop
    /// the backoff state of instances that went away
    pub fn observe(&self, event: &Event<ObjectHandler>) {
        for removed in self.index.apply_event(event) {
            self.forget(&resource_key(&removed.namespace, &removed.name));
        }
    }

    /// Run one reconcile pass for `namespace/name`
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        let key = resource_key(namespace, name);
        self.metrics.reconciliations.inc();
        let timer = self.metrics.reconcile_duration.start_timer();

        let result = self.reconcile_instance(namespace, name).await;
        timer.observe_duration();

        match &result {
            Ok(_) => self.reset_error(&key),
            Err(e) => {
                self.metrics.reconcile_errors.inc();
                self.increment_error(&key);
                warn!("Reconciliation of ObjectHandler {} failed: {}", key, e);
            }
        }
        result
    }

    async fn reconcile_instance(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        let Some(instance) = self
            .bounded("get ObjectHandler", self.repository.get_instance(namespace, name))
            .await?
        else {
            debug!("ObjectHandler {}/{} no longer exists", namespace, name);
            self.index.remove(&InstanceKey::new(namespace, name));
            self.forget(&resource_key(namespace, name));
            return Ok(Action::await_change());
        };
        self.index.upsert(&instance);

        let snapshot = instance.status.clone();
        let mut status = snapshot.clone().unwrap_or_default();
        let generation = instance.metadata.generation;

        let interval = instance.spec.interval();
        let requeue_after = interval.as_ref().copied().unwrap_or(FALLBACK_INTERVAL);
        let pass = match interval {
            Ok(_) => self.run_pass(&instance, namespace, &mut status).await,
            Err(e) => Err(e.into()),
        };

        let mut fatal = None;
        let condition = match pass {
            Ok(()) => {
                info!("ObjectHandler {}/{} reconciled", namespace, name);
                Condition::ready(generation)
            }
            Err(e) => {
                if let ControllerError::HandlerFailures(failures) = &e {
                    self.metrics.handler_failures.inc_by(failures.len() as u64);
                }
                warn!("ObjectHandler {}/{}: {}", namespace, name, e);
                let condition = Condition::not_ready(generation, e.reason(), e.to_string());
                if e.is_transient() {
                    fatal = Some(e);
                }
                condition
            }
        };
        set_condition(&mut status.conditions, condition, Utc::now());

        if status_needs_update(snapshot.as_ref(), &status) {
            let patch = create_status_patch(&status)?;
            self.bounded(
                "patch ObjectHandler status",
                self.repository.patch_instance_status(namespace, name, &patch),
            )
            .await?;
            debug!("Updated status of ObjectHandler {}/{}", namespace, name);
        } else {
            debug!("Status of ObjectHandler {}/{} unchanged, skipping update", namespace, name);
        }

        match fatal {
            Some(e) => Err(e),
            // A zero interval turns periodic passes off
            None if requeue_after.is_zero() => Ok(Action::await_change()),
            None => Ok(Action::requeue(requeue_after)),
        }
    }

    /// Watch, fetch and run handlers; handler records are written into
    /// `status` even when some handlers failed
    async fn run_pass(
        &self,
        instance: &ObjectHandler,
        namespace: &str,
        status: &mut ObjectHandlerStatus,
    ) -> Result<(), ControllerError> {
        let reference = &instance.spec.for_object;
        reference.validate()?;
        let gvk = reference.group_version_kind();

        self.bounded("register watch", self.registry.ensure_watch(&gvk)).await?;

        let target_namespace = reference.resolved_namespace(namespace);
        let object = self
            .bounded("get target object", self.repository.get_object(&gvk, target_namespace, &reference.name))
            .await?
            .ok_or_else(|| ControllerError::TargetNotFound(format!("{reference} in namespace {target_namespace}")))?;

        let handlers = self
            .bounded("resolve handlers", resolve_handlers(self.factory.as_ref(), instance))
            .await?;

        let target = Target {
            reference,
            namespace: target_namespace,
            object: &object,
        };
        let outcome = run_pipeline(&handlers, &target, &status.handler_status, self.handler_timeout).await;
        status.handler_status = outcome.handler_status;
        outcome.failures.into_result()
    }

    /// Run a repository call under the request deadline
    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, ControllerError>>,
    ) -> Result<T, ControllerError> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ControllerError::Timeout(format!(
                "{what} did not finish within {:?}",
                self.request_timeout
            ))),
        }
    }

    /// Get the Fibonacci backoff duration for a resource and advance it
    pub fn next_backoff(&self, resource_key: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .backoff
                .next_backoff(),
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                FALLBACK_INTERVAL
            }
        }
    }

    /// Consecutive failed passes for a resource
    pub fn error_count(&self, resource_key: &str) -> u32 {
        self.backoff_states
            .lock()
            .ok()
            .and_then(|states| states.get(resource_key).map(|s| s.error_count))
            .unwrap_or(0)
    }

    /// Increment error count for a resource
    fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock()
            && let Some(state) = states.get_mut(resource_key)
        {
            state.reset();
        }
    }

    fn forget(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }
}
