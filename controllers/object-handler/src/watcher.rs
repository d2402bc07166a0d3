//! ObjectHandler watcher.
//!
//! Runs the `kube_runtime::Controller` for ObjectHandler resources. Two
//! sources feed the reconcile queue:
//! - the ObjectHandler watch itself, which also keeps the reference index
//!   and per-instance backoff state in step with every instance event
//!   before the reflector store sees it
//! - the trigger channel filled by the dynamic target-kind watches
//!
//! The controller deduplicates requests per instance, so a burst of target
//! events collapses into one pending reconcile.

use crate::error::ControllerError;
use crate::reconcile_helpers::resource_key;
use crate::reconciler::Reconciler;
use crds::ObjectHandler;
use futures::channel::mpsc::UnboundedReceiver;
use futures::{StreamExt, TryStreamExt};
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::{self, ObjectRef};
use kube_runtime::{Controller, WatchStreamExt, watcher};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

async fn reconcile(instance: Arc<ObjectHandler>, ctx: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let namespace = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    debug!("Reconciling ObjectHandler {}/{}", namespace, name);
    ctx.reconcile(&namespace, &name).await
}

/// Requeue with per-instance Fibonacci backoff
fn error_policy(instance: Arc<ObjectHandler>, error: &ControllerError, ctx: Arc<Reconciler>) -> Action {
    let key = resource_key(&instance.namespace().unwrap_or_default(), &instance.name_any());
    let backoff = ctx.next_backoff(&key);
    error!(
        "Reconciliation error for ObjectHandler {} (attempt {}): {}; retrying in {:?}",
        key,
        ctx.error_count(&key),
        error,
        backoff
    );
    Action::requeue(backoff)
}

/// Watch ObjectHandlers and reconcile until a shutdown signal arrives
pub async fn watch_object_handlers(
    api: Api<ObjectHandler>,
    reconciler: Arc<Reconciler>,
    triggers: UnboundedReceiver<ObjectRef<ObjectHandler>>,
    settings: RuntimeConfig,
) -> Result<(), ControllerError> {
    info!("Starting ObjectHandler watcher");

    let (reader, writer) = reflector::store();
    let observer = Arc::clone(&reconciler);
    let instances = watcher(api, watcher::Config::default())
        .default_backoff()
        .map_ok(move |event| {
            observer.observe(&event);
            event
        })
        .reflect(writer)
        .applied_objects();

    Controller::for_stream(instances, reader)
        .with_config(settings)
        .reconcile_on(triggers)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((instance, _)) => debug!("Reconciled ObjectHandler {}", instance),
                Err(e) => warn!("ObjectHandler controller error: {}", e),
            }
        })
        .await;

    info!("ObjectHandler watcher stopped");
    Ok(())
}
