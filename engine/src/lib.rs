//! # Gridsync Engine
//!
//! The data layer behind an editable data grid.
//!
//! Rows come from a [`DataAccessor`] (an in-memory array or a REST backend).
//! A [`DataSource`] sits on top of it and records every uncommitted edit in
//! an [`EditLedger`], so the grid can show pending changes, undo and redo
//! them, and ship them as a JSON Patch on commit. Searchers turn the source
//! into something a view can render: row counts, row ranges and life-cycle
//! events.
//!
//! ## Core Concepts
//!
//! ### Edit ledger
//!
//! The ledger never holds the dataset. It keys pending edits by record id
//! and projects itself onto whatever rows the accessor returns:
//! - added records
//! - removed records (with their pre-removal snapshot)
//! - per-property replacements, with the original value kept for no-op detection
//!
//! ### Cancellable futures
//!
//! Every asynchronous operation returns a [`CancellableFuture`]. Aborting a
//! chained future aborts the one it was chained from, so a superseded
//! search stops its network request too.
//!
//! ### Searchers
//!
//! - [`EagerSearcher`] loads the whole result set.
//! - [`LazySearcher`] loads aligned windows as the view scrolls.
//! - [`PagingSearcher`] pages over either of them.
//! - [`SingleRecordSearcher`] follows one record by id.
//!
//! ## Quick Start
//!
//! ```rust
//! use gridsync_engine::{
//!     accessor::LocalAccessor, DataSearcher, DataSource, EagerSearcher, EditCommand,
//!     FetchRange, SearchParam, SourceConfig,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let accessor = Arc::new(LocalAccessor::new(
//!     "id",
//!     vec![
//!         json!({"id": "1", "name": "Alice"}),
//!         json!({"id": "2", "name": "Bob"}),
//!     ],
//! ));
//! let source = DataSource::new(accessor, SourceConfig::default());
//! let searcher = EagerSearcher::new(source.clone());
//! futures::executor::block_on(searcher.search(SearchParam::new())?)?;
//!
//! source.edit(EditCommand::ReplaceValue {
//!     record: json!({"id": "2", "name": "Bob"}),
//!     property: "name".into(),
//!     value: json!("Robert"),
//! })?;
//!
//! let rows = searcher.get_reference(FetchRange::new(0, 2))?;
//! let names: Vec<_> = rows.records().map(|row| row.current()["name"].clone()).collect();
//! assert_eq!(names, vec![json!("Alice"), json!("Robert")]);
//! assert!(source.has_change());
//! # Ok::<(), gridsync_engine::Error>(())
//! ```
//!
//! ## Persistence
//!
//! Use [`DataSource::ledger_snapshot`] and [`DataSource::restore_ledger`]
//! with [`LedgerSnapshot`] to keep pending edits across sessions.

pub mod accessor;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod future;
pub mod ledger;
pub mod patch;
pub mod query;
pub mod record;
pub mod searcher;
pub mod snapshot;
pub mod source;

// Re-export main types at crate root
pub use accessor::{ChangeType, DataAccessor, LocalAccessor, RemoteAccessor, SourceChange};
pub use command::{CommandBuilder, EditCommand};
pub use config::{LazyConfig, PagingConfig, SourceConfig};
pub use error::{Error, Result};
pub use event::{EventEmitter, ListenerId};
pub use future::{CancellableFuture, Canceller, FutureState};
pub use ledger::{EditLedger, ReplacedRecord, ValueChange};
pub use patch::{apply_patch, PatchOp};
pub use query::{
    FetchParam, FetchRange, FetchResult, Filter, FilterSpec, InitialData, SearchParam,
    SearchResult, SearchSpec, SortKey, SortOrder,
};
pub use record::{record_id_of, EditStatus, EditedRecord, Record};
pub use searcher::{
    DataSearcher, EagerSearcher, LazySearcher, LoadedItem, PagingSearcher, RangeReference,
    SearcherEvent, SingleRecordSearcher,
};
pub use snapshot::{LedgerSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use source::{DataSource, EditEvent, EditKind, SourceEvent};

/// Identifier of a record: the string value of its id property.
pub type RecordId = String;
