use axum::http::StatusCode;
use axum::{body::Body, http::Request, routing::get, Router};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tower::ServiceExt; // for `oneshot` and `ready`

use notify_dispatch::{app::status_route_handler, jobs::dispatch::RunStats};

#[tokio::test]
async fn test_status_route_handler() {
    let run_stats = Arc::new(RwLock::new(RunStats::default()));
    let app = Router::new()
        .route("/", get(status_route_handler))
        .with_state(run_stats);
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Server is running");
    assert_eq!(json["lastRun"]["picked"], 0);
    assert_eq!(json["lastRun"]["sent"], 0);
}

#[tokio::test]
async fn test_status_route_reports_last_run() {
    let run_stats = Arc::new(RwLock::new(RunStats {
        last_run_ts: 1_700_000_000,
        picked: 5,
        sent: 3,
        failed: 1,
        no_tokens: 1,
    }));
    let app = Router::new()
        .route("/", get(status_route_handler))
        .with_state(run_stats);
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["lastRun"]["lastRunTs"], 1_700_000_000i64);
    assert_eq!(json["lastRun"]["picked"], 5);
    assert_eq!(json["lastRun"]["sent"], 3);
    assert_eq!(json["lastRun"]["failed"], 1);
    assert_eq!(json["lastRun"]["noTokens"], 1);
}
