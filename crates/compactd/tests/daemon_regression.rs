//! Daemon regression tests.
//!
//! Runs the assembled daemon against temporary directories and exercises
//! the metrics router end to end.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use compactd::{DaemonOptions, build_router};
use compactd_scheduler::SchedulerMetrics;
use compactd_state::JobStore;
use tower::ServiceExt;

#[tokio::test]
async fn metrics_route_renders_tenants() {
    let metrics = Arc::new(SchedulerMetrics::new());
    metrics.tracker_metrics("tenant-a").set_queue_sizes(4, 1, 0);
    let router = build_router(metrics);

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("compactd_scheduler_pending_jobs{tenant=\"tenant-a\"} 4"));
    assert!(text.contains("compactd_scheduler_active_jobs{tenant=\"tenant-a\"} 1"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let router = build_router(Arc::new(SchedulerMetrics::new()));

    let req = Request::builder().uri("/api/v1/jobs").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn daemon_discovers_tenants_and_persists_them() {
    let data = tempfile::tempdir().unwrap();
    let bucket = tempfile::tempdir().unwrap();
    std::fs::create_dir(bucket.path().join("tenant-a")).unwrap();
    std::fs::create_dir(bucket.path().join("tenant-b")).unwrap();

    let options = DaemonOptions {
        data_dir: Some(data.path().to_path_buf()),
        bucket_dir: Some(bucket.path().to_path_buf()),
        ..DaemonOptions::default()
    };
    compactd::run(options, tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();

    // The daemon released the database on exit.
    let store = JobStore::open(&data.path().join(compactd::daemon::DB_FILE)).unwrap();
    let tenants: Vec<_> = store.list_tenants().unwrap().into_iter().map(|r| r.tenant).collect();
    assert_eq!(tenants, ["tenant-a", "tenant-b"]);
}
