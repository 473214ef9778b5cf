//! Prometheus metrics endpoint

use axum::{
    Extension,
    http::header,
    response::IntoResponse,
};
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics - Prometheus text exposition
pub async fn get(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
