//! Handler pipeline
//!
//! Runs the handlers of one instance against the fetched target. Resolution
//! is all-or-nothing: any configuration error aborts before a handler runs.
//! Execution failures are isolated: they are recorded in the handler's status
//! record and collected, and the remaining handlers still run.

use crate::error::{ControllerError, HandlerFailures};
use crate::handlers::{Handler, HandlerFactory, Target};
use crds::{HandlerStatus, ObjectHandler};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// A handler ready to run, with its key
pub struct ResolvedHandler {
    pub key: String,
    pub handler: Box<dyn Handler>,
}

impl std::fmt::Debug for ResolvedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedHandler").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Result of running the pipeline
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// One record per configured key, in spec order
    pub handler_status: Vec<HandlerStatus>,
    pub failures: HandlerFailures,
}

/// Resolve every handler of `instance`, in spec order
pub async fn resolve_handlers(
    factory: &dyn HandlerFactory,
    instance: &ObjectHandler,
) -> Result<Vec<ResolvedHandler>, ControllerError> {
    let mut resolved = Vec::with_capacity(instance.spec.handlers.len());
    for spec in &instance.spec.handlers {
        let key = spec.key()?;
        let handler = factory.resolve(instance, spec).await?;
        resolved.push(ResolvedHandler { key, handler });
    }
    Ok(resolved)
}

/// Run resolved handlers against `target`.
///
/// Each handler starts from its previous status record so strategy-owned
/// fields survive across passes. Records whose key is no longer configured
/// are not carried over. Handlers sharing a key (identical configuration) run
/// once.
pub async fn run_pipeline(
    handlers: &[ResolvedHandler],
    target: &Target<'_>,
    previous: &[HandlerStatus],
    timeout: Duration,
) -> PipelineOutcome {
    let mut outcome = PipelineOutcome::default();
    let mut visited = HashSet::new();

    for resolved in handlers {
        if !visited.insert(resolved.key.as_str()) {
            debug!("Handler {} configured twice, running once", resolved.key);
            continue;
        }

        let mut status = previous
            .iter()
            .find(|s| s.key == resolved.key)
            .cloned()
            .unwrap_or_else(|| HandlerStatus::new(&resolved.key));

        // On timeout the handler keeps whatever it already wrote to `status`
        let result = match tokio::time::timeout(timeout, resolved.handler.handle(target, &mut status)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ControllerError::Timeout(format!("handler did not finish within {timeout:?}"))),
        };

        match result {
            Ok(()) => status.error.clear(),
            Err(e) => {
                warn!("Handler {} failed: {}", resolved.key, e);
                status.error = e.to_string();
                outcome.failures.push(&resolved.key, status.error.clone());
            }
        }
        outcome.handler_status.push(status);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::deployment;
    use crds::TargetObjectRef;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        fail: Option<&'static str>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Handler for Scripted {
        async fn handle(&self, _target: &Target<'_>, status: &mut HandlerStatus) -> Result<(), ControllerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            status.comment_id = Some(1);
            tokio::time::sleep(self.delay).await;
            match self.fail {
                Some(message) => Err(ControllerError::InvalidConfig(message.to_string())),
                None => Ok(()),
            }
        }
    }

    fn scripted(key: &str, fail: Option<&'static str>, calls: &Arc<AtomicUsize>) -> ResolvedHandler {
        ResolvedHandler {
            key: key.to_string(),
            handler: Box::new(Scripted { fail, delay: Duration::ZERO, calls: Arc::clone(calls) }),
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_aggregated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers = vec![scripted("a", None, &calls), scripted("b", Some("boom"), &calls), scripted("c", None, &calls)];
        let reference = TargetObjectRef::new("apps", "v1", "Deployment", "app");
        let object = deployment("ns", "app", true);
        let target = Target { reference: &reference, namespace: "ns", object: &object };

        let outcome = run_pipeline(&handlers, &target, &[], Duration::from_secs(5)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let keys: Vec<_> = outcome.handler_status.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(outcome.handler_status[0].error, "");
        assert!(outcome.handler_status[1].error.contains("boom"));
        assert_eq!(outcome.handler_status[2].error, "");
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_previous_records_are_reused_and_pruned() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers = vec![scripted("a", None, &calls)];
        let previous = vec![
            HandlerStatus { error: "old failure".into(), last_posted_status_hash: Some("h".into()), ..HandlerStatus::new("a") },
            HandlerStatus::new("removed"),
        ];
        let reference = TargetObjectRef::new("apps", "v1", "Deployment", "app");
        let object = deployment("ns", "app", true);
        let target = Target { reference: &reference, namespace: "ns", object: &object };

        let outcome = run_pipeline(&handlers, &target, &previous, Duration::from_secs(5)).await;

        assert_eq!(outcome.handler_status.len(), 1);
        let record = &outcome.handler_status[0];
        assert_eq!(record.key, "a");
        assert_eq!(record.error, "");
        assert_eq!(record.last_posted_status_hash.as_deref(), Some("h"));
    }

    #[tokio::test]
    async fn test_duplicate_keys_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers = vec![scripted("a", None, &calls), scripted("a", None, &calls)];
        let reference = TargetObjectRef::new("apps", "v1", "Deployment", "app");
        let object = deployment("ns", "app", true);
        let target = Target { reference: &reference, namespace: "ns", object: &object };

        let outcome = run_pipeline(&handlers, &target, &[], Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.handler_status.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_handler_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers = vec![
            ResolvedHandler {
                key: "slow".into(),
                handler: Box::new(Scripted { fail: None, delay: Duration::from_secs(3600), calls: Arc::clone(&calls) }),
            },
            scripted("fast", None, &calls),
        ];
        let reference = TargetObjectRef::new("apps", "v1", "Deployment", "app");
        let object = deployment("ns", "app", true);
        let target = Target { reference: &reference, namespace: "ns", object: &object };

        let outcome = run_pipeline(&handlers, &target, &[], Duration::from_secs(1)).await;

        assert!(outcome.handler_status[0].error.contains("Timed out"));
        assert_eq!(outcome.handler_status[0].comment_id, Some(1));
        assert_eq!(outcome.handler_status[1].error, "");
        assert_eq!(outcome.failures.len(), 1);
    }
}
