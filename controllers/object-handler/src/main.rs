//! ObjectHandler Controller
//!
//! Watches `ObjectHandler` resources and, for each one, keeps a set of
//! handlers (merge request comments and approvals) up to date with the state
//! of the object it points at. Watches on target kinds are registered lazily
//! the first time a kind is referenced.

mod backoff;
mod config;
mod controller;
mod error;
mod handlers;
mod index;
mod metrics;
mod reconcile_helpers;
#[cfg(test)]
mod reconcile_helpers_test;
mod reconciler;
mod registry;
mod repository;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting ObjectHandler Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", config.concurrency);
    info!("  GitLab URL: {}", config.gitlab_api_url);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    info!("ObjectHandler Controller stopped");
    Ok(())
}
