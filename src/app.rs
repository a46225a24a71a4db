use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, IntoMakeService};
use axum::{Json, Router};
use serde_json::json;
use std::sync::{Arc, RwLock};

use crate::jobs::dispatch::RunStats;

pub fn build_app(run_stats: Arc<RwLock<RunStats>>) -> IntoMakeService<Router> {
    tracing::debug!("Initializing the app");
    let app: Router<_, Body> = Router::new()
        .route("/", get(status_route_handler))
        .with_state(run_stats);
    app.into_make_service()
}

/// Liveness probe, also reports the counts of the last dispatch run
pub async fn status_route_handler(
    State(run_stats): State<Arc<RwLock<RunStats>>>,
) -> impl IntoResponse {
    let last_run = run_stats
        .read()
        .map(|stats| stats.clone())
        .unwrap_or_default();
    let response = json!({
        "success": true,
        "message": "Server is running",
        "lastRun": last_run
    });
    (StatusCode::OK, Json(response))
}
