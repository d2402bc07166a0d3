//! Main controller implementation.
//!
//! Wires the Kubernetes repository, the reference index, the dynamic watch
//! registry and the GitLab handler factory into a [`Reconciler`], primes the
//! index, then runs the ObjectHandler controller and the probe/metrics server
//! side by side.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::handlers::{GitlabHandlerFactory, HttpGitlabConnector};
use crate::index::ReferenceIndex;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::registry::{KubeWatchSource, WatchRegistry};
use crate::repository::{KindCache, KubeRepository, ObjectRepository};
use crate::watcher::watch_object_handlers;
use crds::ObjectHandler;
use futures::channel::mpsc;
use kube::{Api, Client};
use kube_runtime::controller::Config as RuntimeConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for ObjectHandler resources.
pub struct Controller {
    controller: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing ObjectHandler Controller");

        let client = Client::try_default().await?;
        let kinds = Arc::new(KindCache::new(client.clone()));
        let repository: Arc<dyn ObjectRepository> =
            Arc::new(KubeRepository::new(Arc::clone(&kinds), config.watch_namespace.clone()));
        let metrics = Metrics::new()?;

        let index = Arc::new(ReferenceIndex::default());
        let (sender, triggers) = mpsc::unbounded();
        let source = Arc::new(KubeWatchSource::new(kinds, config.watch_namespace.clone()));
        let registry = Arc::new(WatchRegistry::new(source, Arc::clone(&index), sender, metrics.clone()));

        let factory = Arc::new(GitlabHandlerFactory::new(
            Arc::clone(&repository),
            Arc::new(HttpGitlabConnector),
            config.gitlab_api_url.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            repository,
            registry,
            index,
            factory,
            metrics.clone(),
            &config,
        ));

        info!("Priming reference index from existing ObjectHandlers...");
        match reconciler.prime_index().await {
            Ok(count) => info!("Indexed {} ObjectHandler(s)", count),
            Err(e) => warn!("Priming the reference index failed (will continue): {}", e),
        }

        let api: Api<ObjectHandler> = match config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let settings = RuntimeConfig::default()
            .debounce(config.debounce)
            .concurrency(config.concurrency);

        let controller = tokio::spawn(watch_object_handlers(api, reconciler, triggers, settings));
        let metrics_server = tokio::spawn(metrics::serve(config.metrics_addr, metrics.clone()));
        metrics.set_ready();

        Ok(Self {
            controller,
            metrics_server,
        })
    }

    /// Runs until the controller shuts down or a task fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("ObjectHandler Controller running");

        let result = tokio::select! {
            result = &mut self.controller => {
                result
                    .map_err(|e| ControllerError::Watch(format!("ObjectHandler controller panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ObjectHandler controller error: {}", e)))
            }
            result = &mut self.metrics_server => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))?
                    .and_then(|()| Err(ControllerError::Watch("Metrics server exited".to_string())))
            }
        };

        self.controller.abort();
        self.metrics_server.abort();
        result
    }
}
