//! DataSource - the single authority over one accessor and its pending edits.
//!
//! Everything a searcher reads goes through the source, which overlays the
//! edit ledger on raw accessor results. The source also owns the undo/redo
//! history and the commit life cycle:
//!
//! `commitStart` → accessor commit → `commitSuccess` | `commitError` →
//! `commitComplete`.
//!
//! Events are emitted without holding the state lock, so listeners may call
//! back into the source.

use crate::{
    accessor::{DataAccessor, SourceChange},
    command::EditCommand,
    config::SourceConfig,
    error::Result,
    event::{EventEmitter, ListenerId},
    query::{FetchParam, FetchRange, SearchParam, SearchResult},
    snapshot::LedgerSnapshot,
    CancellableFuture, EditLedger, EditStatus, EditedRecord, Error, PatchOp, Record, RecordId,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// What produced an edit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    Edit,
    Undo,
    Redo,
}

/// Records affected by an edit, undo or redo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditEvent {
    pub kind: EditKind,
    pub record_ids: Vec<RecordId>,
}

impl EditEvent {
    pub fn affects(&self, id: &str) -> bool {
        self.record_ids.iter().any(|r| r == id)
    }
}

/// Events emitted by a [`DataSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// The accessor reported a change to the underlying data
    ChangeSource(SourceChange),
    Edit(EditEvent),
    CommitStart,
    CommitSuccess(Value),
    CommitError(Error),
    CommitComplete,
    Rollback,
}

struct SourceState {
    ledger: EditLedger,
    undo: Vec<EditCommand>,
    redo: Vec<EditCommand>,
    committing: bool,
}

impl SourceState {
    fn reset(&mut self) {
        self.ledger.clear();
        self.undo.clear();
        self.redo.clear();
    }
}

struct Shared {
    accessor: Arc<dyn DataAccessor>,
    config: SourceConfig,
    state: Mutex<SourceState>,
    events: EventEmitter<SourceEvent>,
    accessor_listener: ListenerId,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.accessor.events().off(self.accessor_listener);
    }
}

/// Resets the committing flag if a commit future is dropped unfinished.
struct CommitGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl CommitGuard {
    fn release(&mut self) {
        if self.armed {
            self.armed = false;
            self.shared.state.lock().committing = false;
        }
    }
}

impl Drop for CommitGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns one accessor and one edit ledger. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DataSource {
    shared: Arc<Shared>,
}

impl DataSource {
    pub fn new(accessor: Arc<dyn DataAccessor>, config: SourceConfig) -> Self {
        let ledger = EditLedger::new(config.id_property.clone());
        Self::build(accessor, config, ledger)
    }

    /// Create a source with edits restored from a snapshot.
    pub fn with_snapshot(
        accessor: Arc<dyn DataAccessor>,
        config: SourceConfig,
        snapshot: LedgerSnapshot,
    ) -> Result<Self> {
        let ledger = snapshot.into_ledger(&config.id_property)?;
        Ok(Self::build(accessor, config, ledger))
    }

    fn build(accessor: Arc<dyn DataAccessor>, config: SourceConfig, ledger: EditLedger) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            let accessor_listener = accessor.events().on(move |change: &SourceChange| {
                if let Some(shared) = weak.upgrade() {
                    debug!(change_type = ?change.change_type, "source changed");
                    shared
                        .events
                        .emit(&SourceEvent::ChangeSource(change.clone()));
                }
            });

            Shared {
                accessor,
                config,
                state: Mutex::new(SourceState {
                    ledger,
                    undo: Vec::new(),
                    redo: Vec::new(),
                    committing: false,
                }),
                events: EventEmitter::new(),
                accessor_listener,
            }
        });

        Self { shared }
    }

    pub fn id_property(&self) -> &str {
        &self.shared.config.id_property
    }

    pub fn accessor(&self) -> &Arc<dyn DataAccessor> {
        &self.shared.accessor
    }

    pub fn events(&self) -> &EventEmitter<SourceEvent> {
        &self.shared.events
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Search the accessor; rows are projected through the ledger when the
    /// result arrives.
    pub fn search_data(&self, param: &SearchParam) -> CancellableFuture<SearchResult<EditedRecord>> {
        let shared = Arc::clone(&self.shared);
        self.shared.accessor.search(param).map(move |result| {
            let state = shared.state.lock();
            result.try_map_data(|record| state.ledger.apply_data(&record))
        })
    }

    /// Fetch a window of a previous search, projected through the ledger.
    pub fn fetch_data(
        &self,
        param: &FetchParam,
        range: FetchRange,
    ) -> CancellableFuture<Vec<EditedRecord>> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .accessor
            .fetch(param, range)
            .map(move |result| {
                let state = shared.state.lock();
                result
                    .data
                    .iter()
                    .map(|record| state.ledger.apply_data(record))
                    .collect()
            })
    }

    /// Look up one record. Locally added records never reach the accessor.
    pub fn find_data(&self, id: &str) -> CancellableFuture<Option<EditedRecord>> {
        let added = self
            .shared
            .state
            .lock()
            .ledger
            .project_id(id)
            .filter(|record| record.edit_status == EditStatus::Added);
        if let Some(added) = added {
            return CancellableFuture::resolved(Some(added));
        }

        let shared = Arc::clone(&self.shared);
        self.shared.accessor.find(id).map(move |found| match found {
            Some(record) => shared.state.lock().ledger.apply_data(&record).map(Some),
            None => Ok(None),
        })
    }

    /// Project pending edits onto a raw record.
    pub fn apply_data(&self, record: &Record) -> Result<EditedRecord> {
        self.shared.state.lock().ledger.apply_data(record)
    }

    /// What the ledger alone knows about an id.
    pub fn project_id(&self, id: &str) -> Option<EditedRecord> {
        self.shared.state.lock().ledger.project_id(id)
    }

    pub fn status_of(&self, id: &str) -> EditStatus {
        self.shared.state.lock().ledger.status_of(id)
    }

    /// Locally created records, in creation order.
    pub fn added_records(&self) -> Vec<EditedRecord> {
        self.shared.state.lock().ledger.added_records()
    }

    pub fn added_count(&self) -> usize {
        self.shared.state.lock().ledger.added_count()
    }

    /// Derive the id of a record.
    pub fn get_data_id(&self, record: &Record) -> Result<RecordId> {
        self.shared.state.lock().ledger.get_data_id(record)
    }

    pub fn has_change(&self) -> bool {
        self.shared.state.lock().ledger.has_change()
    }

    /// Patch that would persist every pending edit.
    pub fn calc_patch(&self) -> Vec<PatchOp> {
        self.shared.state.lock().ledger.calc_patch()
    }

    // ------------------------------------------------------------------
    // Edits and history
    // ------------------------------------------------------------------

    /// Apply a command and record it for undo.
    pub fn edit(&self, command: EditCommand) -> Result<()> {
        let record_ids = {
            let mut state = self.shared.state.lock();
            command.apply(&mut state.ledger)?;
            let ids = touched_ids(&state.ledger, &command);
            state.undo.push(command);
            ids
        };

        debug!(records = record_ids.len(), "edit applied");
        self.emit_edit(EditKind::Edit, record_ids);
        Ok(())
    }

    /// Revert the most recent edit. Returns `false` when there is nothing to undo.
    pub fn undo(&self) -> Result<bool> {
        let record_ids = {
            let mut state = self.shared.state.lock();
            let Some(command) = state.undo.pop() else {
                return Ok(false);
            };
            if let Err(err) = command.revert(&mut state.ledger) {
                state.undo.push(command);
                return Err(err);
            }
            let ids = touched_ids(&state.ledger, &command);
            state.redo.push(command);
            ids
        };

        self.emit_edit(EditKind::Undo, record_ids);
        Ok(true)
    }

    /// Re-apply the most recently undone edit. Returns `false` when there is
    /// nothing to redo.
    pub fn redo(&self) -> Result<bool> {
        let record_ids = {
            let mut state = self.shared.state.lock();
            let Some(command) = state.redo.pop() else {
                return Ok(false);
            };
            if let Err(err) = command.apply(&mut state.ledger) {
                state.redo.push(command);
                return Err(err);
            }
            let ids = touched_ids(&state.ledger, &command);
            state.undo.push(command);
            ids
        };

        self.emit_edit(EditKind::Redo, record_ids);
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        !self.shared.state.lock().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.shared.state.lock().redo.is_empty()
    }

    fn emit_edit(&self, kind: EditKind, record_ids: Vec<RecordId>) {
        self.shared
            .events
            .emit(&SourceEvent::Edit(EditEvent { kind, record_ids }));
    }

    // ------------------------------------------------------------------
    // Commit and rollback
    // ------------------------------------------------------------------

    pub fn is_committing(&self) -> bool {
        self.shared.state.lock().committing
    }

    /// Persist every pending edit through the accessor.
    ///
    /// Fails with [`Error::DuplicateCommit`] while another commit is running.
    /// On success the ledger and the undo/redo history are cleared.
    pub fn commit(&self) -> Result<CancellableFuture<Value>> {
        let ledger = {
            let mut state = self.shared.state.lock();
            if state.committing {
                return Err(Error::DuplicateCommit);
            }
            state.committing = true;
            state.ledger.clone()
        };

        info!(records = ledger.changed_ids().len(), "commit started");
        self.shared.events.emit(&SourceEvent::CommitStart);

        let request = self.shared.accessor.commit(&ledger);
        let canceller = request.canceller();
        let mut guard = CommitGuard {
            shared: Arc::clone(&self.shared),
            armed: true,
        };

        Ok(CancellableFuture::with_abort_hook(
            async move {
                let result = request.await;
                guard.release();

                let shared = &guard.shared;
                match &result {
                    Ok(reply) => {
                        shared.state.lock().reset();
                        info!("commit succeeded");
                        shared.events.emit(&SourceEvent::CommitSuccess(reply.clone()));
                    }
                    Err(err) => {
                        warn!(error = %err, "commit failed");
                        shared.events.emit(&SourceEvent::CommitError(err.clone()));
                    }
                }
                shared.events.emit(&SourceEvent::CommitComplete);
                result
            },
            move || canceller.abort(),
        ))
    }

    /// Discard every pending edit and the undo/redo history.
    pub fn rollback(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if state.committing {
                return Err(Error::RollbackDuringCommit);
            }
            state.reset();
        }

        info!("pending edits rolled back");
        self.shared.events.emit(&SourceEvent::Rollback);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Capture pending edits for later restoration.
    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot::capture(&self.shared.state.lock().ledger)
    }

    /// Replace pending edits with a snapshot. History is cleared.
    pub fn restore_ledger(&self, snapshot: LedgerSnapshot) -> Result<()> {
        let record_ids = {
            let mut state = self.shared.state.lock();
            if state.committing {
                return Err(Error::RollbackDuringCommit);
            }
            let ledger = snapshot.into_ledger(&self.shared.config.id_property)?;

            let mut ids = state.ledger.changed_ids();
            for id in ledger.changed_ids() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }

            state.reset();
            state.ledger = ledger;
            ids
        };

        self.emit_edit(EditKind::Edit, record_ids);
        Ok(())
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DataSource")
            .field("id_property", &self.shared.config.id_property)
            .field("pending", &state.ledger.changed_ids().len())
            .field("committing", &state.committing)
            .finish()
    }
}

/// Ids of the records a command touched, deduplicated in order.
fn touched_ids(ledger: &EditLedger, command: &EditCommand) -> Vec<RecordId> {
    let mut ids: Vec<RecordId> = Vec::new();
    for record in command.records() {
        if let Ok(id) = ledger.get_data_id(record) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}
