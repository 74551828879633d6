//! Route table.

pub mod runs;
pub mod team;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;
use crate::ws;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/team/runs", post(team::start_team_run))
        .route("/v1/runs/:run_id/events", get(runs::run_events_sse))
        .route("/v1/ws", get(ws::ws_upgrade))
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
