//! Error types for the grid sync engine.
//!
//! Shape violations (bad record ids, stale edits, calls made in the wrong
//! lifecycle state) are returned synchronously. Asynchronous failures reach
//! callers only through a rejected [`CancellableFuture`](crate::CancellableFuture).

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Record identity errors
    #[error("id property '{property}' not found in record")]
    NotFoundIdProperty { property: String },

    #[error("id property '{property}' has illegal value: {found}")]
    IllegalTypeDataId { property: String, found: String },

    #[error("record id already in use: {0}")]
    DuplicateDataId(RecordId),

    // Edit errors
    #[error("inconsistent update of '{property}' on record {id}")]
    InconsistentUpdate { id: RecordId, property: String },

    #[error("cannot update removed record: {0}")]
    UpdateRemovedData(RecordId),

    // Commit life-cycle errors
    #[error("a commit is already in progress")]
    DuplicateCommit,

    #[error("cannot roll back while a commit is in progress")]
    RollbackDuringCommit,

    // Searcher errors
    #[error("searcher is not ready")]
    NotYetReady,

    #[error("search has already been started")]
    AlreadySearch,

    #[error("index {index} out of bounds (count {count})")]
    IndexOutOfBounds { index: usize, count: usize },

    #[error("illegal index: {0}")]
    IllegalIndex(String),

    #[error("illegal filter: {0}")]
    IllegalFilter(String),

    // Accessor errors
    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("request aborted")]
    Aborted,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    // Patch errors
    #[error("patch test failed at {path}")]
    PatchTest { path: String },

    #[error("invalid patch target: {path}")]
    PatchTarget { path: String },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// Whether this failure is a cancellation rather than a real error.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// Coarse grouping used for programmatic matching.
    pub fn category(&self) -> &'static str {
        match self {
            Error::NotFoundIdProperty { .. }
            | Error::IllegalTypeDataId { .. }
            | Error::DuplicateDataId(_)
            | Error::InconsistentUpdate { .. }
            | Error::UpdateRemovedData(_) => "data",
            Error::DuplicateCommit | Error::RollbackDuringCommit => "source",
            Error::NotYetReady
            | Error::AlreadySearch
            | Error::IndexOutOfBounds { .. }
            | Error::IllegalIndex(_)
            | Error::IllegalFilter(_) => "searcher",
            Error::NotSupported(_) | Error::Transport(_) | Error::InvalidResponse(_) => {
                "accessor"
            }
            Error::Aborted => "future",
            Error::PatchTest { .. } | Error::PatchTarget { .. } => "patch",
            Error::InvalidSnapshot(_) => "snapshot",
        }
    }

    /// Stable identifier of the error kind.
    pub fn key(&self) -> &'static str {
        match self {
            Error::NotFoundIdProperty { .. } => "NotFoundIdProperty",
            Error::IllegalTypeDataId { .. } => "IllegalTypeDataId",
            Error::DuplicateDataId(_) => "DuplicateDataId",
            Error::InconsistentUpdate { .. } => "InconsistentUpdate",
            Error::UpdateRemovedData(_) => "UpdateRemovedData",
            Error::DuplicateCommit => "DuplicateCommit",
            Error::RollbackDuringCommit => "RollbackDuringCommit",
            Error::NotYetReady => "NotYetReady",
            Error::AlreadySearch => "AlreadySearch",
            Error::IndexOutOfBounds { .. } => "IndexOutOfBounds",
            Error::IllegalIndex(_) => "IllegalIndex",
            Error::IllegalFilter(_) => "IllegalFilter",
            Error::NotSupported(_) => "NotSupported",
            Error::Aborted => "Aborted",
            Error::Transport(_) => "Transport",
            Error::InvalidResponse(_) => "InvalidResponse",
            Error::PatchTest { .. } => "PatchTest",
            Error::PatchTarget { .. } => "PatchTarget",
            Error::InvalidSnapshot(_) => "InvalidSnapshot",
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
