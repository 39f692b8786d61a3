//! Data accessors: the only layer that talks to physical storage.

mod local;
mod remote;
mod transport;

pub use local::LocalAccessor;
pub use remote::{Adapter, FetchRequest, RemoteAccessor, RemoteConfig};
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
pub use transport::{Method, Transport, TransportRequest};

use crate::{
    event::EventEmitter,
    query::{FetchParam, FetchRange, FetchResult, SearchParam, SearchResult},
    CancellableFuture, EditLedger, Record, RecordId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of change a backend reports outside of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Everything may have changed
    Reset,
    Add,
    Remove,
    Update,
}

/// Notification that the underlying data changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceChange {
    pub change_type: ChangeType,
    #[serde(default)]
    pub record_ids: Vec<RecordId>,
}

impl SourceChange {
    pub fn reset() -> Self {
        Self {
            change_type: ChangeType::Reset,
            record_ids: Vec::new(),
        }
    }

    /// Whether the change may affect `id`.
    pub fn affects(&self, id: &str) -> bool {
        self.change_type == ChangeType::Reset || self.record_ids.iter().any(|r| r == id)
    }
}

/// Access to a physical data source.
///
/// Implementations never see edit overlays; they return raw records and
/// persist a ledger on `commit`.
pub trait DataAccessor: Send + Sync {
    /// Start a search, learning how many rows match.
    fn search(&self, param: &SearchParam) -> CancellableFuture<SearchResult>;

    /// Fetch a window of a previous search's rows.
    fn fetch(&self, param: &FetchParam, range: FetchRange) -> CancellableFuture<FetchResult>;

    /// Look up one record by id.
    fn find(&self, id: &str) -> CancellableFuture<Option<Record>>;

    /// Persist every pending edit in `ledger`.
    fn commit(&self, ledger: &EditLedger) -> CancellableFuture<Value>;

    /// Change notifications from the backend.
    fn events(&self) -> &EventEmitter<SourceChange>;
}
