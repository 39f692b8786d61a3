//! Liveness and table statistics.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Body of `GET /health`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Rows currently stored
    pub records: usize,
    pub id_property: String,
    /// Search snapshots still fetchable
    pub retained_searches: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let table = &state.table;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        records: table.len().await,
        id_property: table.id_property().to_string(),
        retained_searches: table.retained_searches(),
    })
}

async fn root() -> &'static str {
    "Gridsync Server"
}
