//! HTTP surface of the daemon.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use compactd_scheduler::SchedulerMetrics;

/// Build the metrics router.
pub fn build_router(metrics: Arc<SchedulerMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .with_state(metrics)
}

/// GET /metrics
pub async fn prometheus_metrics(State(metrics): State<Arc<SchedulerMetrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render_prometheus(),
    )
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let metrics = Arc::new(SchedulerMetrics::new());
        metrics.tracker_metrics("tenant-a").set_queue_sizes(2, 0, 0);

        let resp = prometheus_metrics(State(metrics)).await.into_response();

        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let resp = healthz().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
