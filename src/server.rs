//! HTTP endpoint serving the exporter's gauges to Prometheus.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use log::{debug, error, info};
use prometheus::TEXT_FORMAT;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::metrics::ExporterMetrics;

/// Routes: `/` points at the metrics path, `/metrics` serves the registry,
/// `/health` answers liveness checks.
pub fn router(metrics: ExporterMetrics) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics)
}

/// Serves scrapes on `addr` until `shutdown` resolves.
pub async fn serve(
    metrics: ExporterMetrics,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Serving metrics on http://{}/metrics", listener.local_addr()?);

    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("Metrics server error: {e}"))
}

async fn index_handler() -> &'static str {
    "/metrics"
}

async fn metrics_handler(State(metrics): State<ExporterMetrics>) -> Response {
    match metrics.encode_text() {
        Ok(body) => {
            debug!("Serving {} bytes of metrics", body.len());
            (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
