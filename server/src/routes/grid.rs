//! Grid protocol routes.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use gridsync_engine::{accessor::FetchRequest, FetchResult, PatchOp, Record, SearchResult, SearchSpec};

use crate::error::Result;
use crate::handlers::{handle_commit, handle_fetch, handle_find, handle_search, CommitResponse};
use crate::AppState;

/// Create grid routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/search", post(search_handler))
        .route("/fetch", post(fetch_handler))
        .route("/records/{id}", get(find_handler))
        .route("/commit", post(commit_handler))
}

/// POST /search - Match records and open a fetchable result set.
async fn search_handler(
    State(state): State<AppState>,
    Json(spec): Json<SearchSpec>,
) -> Result<Json<SearchResult>> {
    let response = handle_search(&state.table, spec).await?;
    Ok(Json(response))
}

/// POST /fetch - Serve a window of a previous search.
async fn fetch_handler(
    State(state): State<AppState>,
    Json(request): Json<FetchRequest>,
) -> Result<Json<FetchResult>> {
    let response = handle_fetch(&state.table, request)?;
    Ok(Json(response))
}

/// GET /records/{id} - Look one record up.
async fn find_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Record>> {
    let response = handle_find(&state.table, &id).await?;
    Ok(Json(response))
}

/// POST /commit - Apply a patch of pending edits.
async fn commit_handler(
    State(state): State<AppState>,
    Json(patch): Json<Vec<PatchOp>>,
) -> Result<Json<CommitResponse>> {
    let response = handle_commit(&state.table, patch).await?;
    Ok(Json(response))
}
