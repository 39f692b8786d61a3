//! Gridsync Server - REST backend for the grid sync engine.
//!
//! Serves an in-memory record table over the protocol spoken by
//! `gridsync_engine::RemoteAccessor`: searches with retained result sets,
//! window fetches, single record lookups and JSON Patch commits.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::config::Config;
use crate::db::Table;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub table: Arc<Table>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, table: Table) -> Self {
        Self {
            table: Arc::new(table),
            config: Arc::new(config),
        }
    }
}

/// Build the router with tracing and CORS applied.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}
