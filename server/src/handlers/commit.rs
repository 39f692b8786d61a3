//! Commit handler - applies a client's pending edits as one patch.

use crate::db::Table;
use crate::error::Result;
use chrono::{DateTime, Utc};
use gridsync_engine::PatchOp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response for a successful commit.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    /// Identifier assigned to this commit
    pub commit_id: String,
    /// When the patch was applied
    pub committed_at: DateTime<Utc>,
    /// Number of patch operations applied
    pub applied: usize,
}

/// Apply a patch. A failed `test` rejects the whole patch.
pub async fn handle_commit(table: &Table, patch: Vec<PatchOp>) -> Result<CommitResponse> {
    let applied = table.commit(&patch).await?;

    let response = CommitResponse {
        commit_id: Uuid::new_v4().to_string(),
        committed_at: Utc::now(),
        applied,
    };
    tracing::info!(commit_id = %response.commit_id, applied, "commit accepted");
    Ok(response)
}
