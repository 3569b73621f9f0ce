//! HTTP surface: a single `GET /metrics` scrape endpoint.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tracing::error;

use file_exporter_core::metrics::DirectoryMetrics;

use crate::access_log::AccessLogLayer;

pub(crate) type AppState = State<Arc<DirectoryMetrics>>;

pub(crate) fn router(metrics: Arc<DirectoryMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(metrics)
        .layer(AccessLogLayer)
        .layer(CompressionLayer::new())
}

pub(crate) async fn handle_metrics(State(metrics): AppState) -> Response {
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, metrics.content_type())], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}
