// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP endpoints for Prometheus scraping and liveness probing.

use crate::controller::NegController;
use crate::metrics::PrometheusMetrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tracing::error;

/// Answers liveness probes.
pub trait HealthProbe: Send + Sync {
    fn is_healthy(&self) -> bool;
}

impl HealthProbe for NegController {
    fn is_healthy(&self) -> bool {
        NegController::is_healthy(self)
    }
}

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct ServerState {
    pub metrics: Arc<PrometheusMetrics>,
    pub health: Arc<dyn HealthProbe>,
}

/// Router serving `/metrics` and `/healthz`.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<ServerState>) -> (StatusCode, String) {
    match state.metrics.gather() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn healthz_handler(State(state): State<ServerState>) -> (StatusCode, &'static str) {
    if state.health.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "no reconciliation pass within the staleness bound")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Probe(AtomicBool);

    impl HealthProbe for Probe {
        fn is_healthy(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn state(healthy: bool) -> (ServerState, Arc<Probe>) {
        let probe = Arc::new(Probe(AtomicBool::new(healthy)));
        let state = ServerState {
            metrics: Arc::new(PrometheusMetrics::new().unwrap()),
            health: probe.clone(),
        };
        (state, probe)
    }

    #[tokio::test]
    async fn test_healthz_follows_probe() {
        let (state, probe) = state(true);
        let (code, _) = healthz_handler(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);

        probe.0.store(false, Ordering::SeqCst);
        let (code, _) = healthz_handler(State(state)).await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_metrics_exposes_registry() {
        let (state, _) = state(true);
        state.metrics.record_controller_error("service");

        let (code, body) = metrics_handler(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.contains("controller_errors_total"));
    }
}
