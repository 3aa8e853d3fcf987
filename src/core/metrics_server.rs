// src/core/metrics_server.rs

//! A tiny HTTP server exposing `/metrics` in Prometheus text format, bound
//! only when `AfdMonConfig.metrics_addr` is set (spec `SPEC_FULL.md` §2.3,
//! ambient observability). Grounded on the teacher's own metrics server:
//! same `axum` + single-route shape, with the per-request gauge refresh
//! dropped since this controller's gauges are already updated at the point
//! of change rather than lazily on scrape.

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use tracing::{error, info};

use crate::core::metrics;

async fn metrics_handler() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], metrics::render())
}

/// Binds `addr` and serves `/metrics` until the process exits. Runs as a
/// best-effort side task: a bind failure is logged but never aborts the
/// supervisor or a worker, since metrics are an observability aid, not a
/// load-bearing dependency.
pub async fn run(addr: String) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind metrics server");
            return;
        }
    };

    info!(%addr, "Prometheus metrics server listening on /metrics");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "metrics server exited with an error");
    }
}
