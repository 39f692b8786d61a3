//! Single record lookup.

use crate::db::Table;
use crate::error::{AppError, Result};
use gridsync_engine::Record;

/// Look a record up by id.
pub async fn handle_find(table: &Table, id: &str) -> Result<Record> {
    table
        .find(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("record {id}")))
}
