//! Prometheus metrics and the probe/metrics HTTP server.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// Controller metrics, registered in a private registry.
///
/// Clones share the underlying collectors.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    ready: Arc<AtomicBool>,
    pub reconciliations: IntCounter,
    pub reconcile_errors: IntCounter,
    pub handler_failures: IntCounter,
    pub watched_kinds: IntGauge,
    pub reconcile_duration: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconciliations = IntCounter::new(
            "objecthandler_reconciliations_total",
            "Reconcile passes started",
        )?;
        let reconcile_errors = IntCounter::new(
            "objecthandler_reconcile_errors_total",
            "Reconcile passes that returned an error to the scheduler",
        )?;
        let handler_failures = IntCounter::new(
            "objecthandler_handler_failures_total",
            "Handler executions that failed",
        )?;
        let watched_kinds = IntGauge::new(
            "objecthandler_watched_kinds",
            "Target kinds with an active watch",
        )?;
        let reconcile_duration = Histogram::with_opts(HistogramOpts::new(
            "objecthandler_reconcile_duration_seconds",
            "Duration of reconcile passes",
        ))?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_errors.clone()))?;
        registry.register(Box::new(handler_failures.clone()))?;
        registry.register(Box::new(watched_kinds.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            ready: Arc::new(AtomicBool::new(false)),
            reconciliations,
            reconcile_errors,
            handler_failures,
            watched_kinds,
            reconcile_duration,
        })
    }

    /// Mark the controller ready (index primed, controller started)
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Text exposition of all metrics
    pub fn render(&self) -> Result<String, ControllerError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Metrics>) -> impl IntoResponse {
    if metrics.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn render_metrics(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())], body),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                e.to_string(),
            )
        }
    }
}

/// Serve `/healthz`, `/readyz` and `/metrics` until the process exits
pub async fn serve(addr: SocketAddr, metrics: Metrics) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Probe and metrics server listening on {}", addr);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}
