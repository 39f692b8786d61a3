//! Whole-result-set searcher with incremental edit tracking.

use super::{
    check_range, emit_outcome, spawn_refresh, DataSearcher, Lifecycle, RangeReference,
    SearchRequest, SearcherEvent, SourceSubscription,
};
use crate::{
    error::Result,
    event::EventEmitter,
    query::{FetchParam, FetchRange, SearchParam},
    source::{DataSource, SourceEvent},
    CancellableFuture, EditStatus, EditedRecord, Error, Record, RecordId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Rows of a completed search, before they are cached.
struct Loaded {
    fetch_param: FetchParam,
    rows: Vec<EditedRecord>,
}

#[derive(Default)]
struct EagerState {
    lifecycle: Lifecycle,
    applied: SearchParam,
    fetch_param: FetchParam,
    /// Visible rows: accessor rows first, then locally added ones
    records: Vec<EditedRecord>,
    index: HashMap<RecordId, usize>,
    /// Originals of matched rows hidden by a pending removal
    hidden: HashMap<RecordId, Record>,
}

impl EagerState {
    fn install(&mut self, param: SearchParam, loaded: Loaded, added: Vec<EditedRecord>) {
        self.applied = param;
        self.fetch_param = loaded.fetch_param;
        self.records.clear();
        self.index.clear();
        self.hidden.clear();

        for row in loaded.rows {
            if row.is_visible() {
                self.push(row);
            } else if let Some(original) = row.original {
                self.hidden.insert(row.record_id, original);
            }
        }
        for row in added {
            if !self.index.contains_key(&row.record_id) {
                self.push(row);
            }
        }
    }

    fn push(&mut self, row: EditedRecord) {
        self.index.insert(row.record_id.clone(), self.records.len());
        self.records.push(row);
    }

    /// Remove the row at `position`, shifting every later index down by one.
    fn remove_at(&mut self, position: usize) -> EditedRecord {
        let row = self.records.remove(position);
        self.index.remove(&row.record_id);
        for (offset, later) in self.records[position..].iter().enumerate() {
            self.index.insert(later.record_id.clone(), position + offset);
        }
        row
    }
}

struct EagerInner {
    source: DataSource,
    state: Mutex<EagerState>,
    events: EventEmitter<SearcherEvent>,
    _subscription: SourceSubscription,
}

impl EagerInner {
    fn start(self: &Arc<Self>, request: SearchRequest) -> Result<CancellableFuture<()>> {
        let (generation, param, kind) = self.state.lock().lifecycle.begin(request)?;
        debug!(generation, ?kind, "eager search started");
        self.events.emit(&kind.start());

        let future = load(&self.source, &param);
        let canceller = future.canceller();
        self.state
            .lock()
            .lifecycle
            .track(generation, canceller.clone());

        let weak = Arc::downgrade(self);
        Ok(CancellableFuture::with_abort_hook(
            async move {
                let result = future.await;
                let inner = weak.upgrade().ok_or(Error::Aborted)?;

                let added = inner.source.added_records();
                let outcome = {
                    let mut state = inner.state.lock();
                    let Some(first_ready) = state.lifecycle.settle(generation, result.is_ok())
                    else {
                        debug!(generation, "superseded eager search dropped");
                        return Err(Error::Aborted);
                    };
                    result.map(|loaded| {
                        state.install(param, loaded, added);
                        first_ready
                    })
                };

                emit_outcome(&inner.events, kind, &outcome);
                outcome.map(|_| ())
            },
            move || canceller.abort(),
        ))
    }

    fn on_source_event(self: &Arc<Self>, event: &SourceEvent) {
        if let SourceEvent::Edit(edit) = event {
            self.apply_edit(&edit.record_ids);
        }

        self.events.emit(&SearcherEvent::Source(event.clone()));

        if matches!(
            event,
            SourceEvent::ChangeSource(_) | SourceEvent::CommitSuccess(_) | SourceEvent::Rollback
        ) {
            spawn_refresh("eager", self.start(SearchRequest::Refresh));
        }
    }

    /// Re-project the cached rows of edited records.
    fn apply_edit(&self, record_ids: &[RecordId]) {
        let mut state = self.state.lock();
        if !state.lifecycle.is_ready() {
            return;
        }

        for id in record_ids {
            match state.index.get(id).copied() {
                Some(position) => {
                    let projected = match state.records[position].original.clone() {
                        Some(original) => self.source.apply_data(&original).ok(),
                        None => self
                            .source
                            .project_id(id)
                            .filter(|row| row.edit_status == EditStatus::Added),
                    };

                    match projected {
                        Some(row) if row.is_visible() => state.records[position] = row,
                        Some(row) => {
                            state.remove_at(position);
                            if let Some(original) = row.original {
                                state.hidden.insert(id.clone(), original);
                            }
                        }
                        None => {
                            state.remove_at(position);
                        }
                    }
                }
                None => {
                    if let Some(original) = state.hidden.get(id).cloned() {
                        let restored = self
                            .source
                            .apply_data(&original)
                            .ok()
                            .filter(EditedRecord::is_visible);
                        if let Some(row) = restored {
                            state.hidden.remove(id);
                            state.push(row);
                        }
                    } else if let Some(row) = self.source.project_id(id) {
                        if row.edit_status == EditStatus::Added {
                            state.push(row);
                        }
                    }
                }
            }
        }
    }
}

/// Search, then fetch everything the search did not return inline.
fn load(source: &DataSource, param: &SearchParam) -> CancellableFuture<Loaded> {
    let fetch_source = source.clone();
    source.search_data(param).and_then(move |result| async move {
        match result.initial_data {
            Some(initial) if initial.is_all_data => Ok(Loaded {
                fetch_param: result.fetch_param,
                rows: initial.data,
            }),
            _ if result.fetch_limit == 0 => Ok(Loaded {
                fetch_param: result.fetch_param,
                rows: Vec::new(),
            }),
            _ => {
                let rows = fetch_source
                    .fetch_data(&result.fetch_param, FetchRange::new(0, result.fetch_limit))
                    .await?;
                Ok(Loaded {
                    fetch_param: result.fetch_param,
                    rows,
                })
            }
        }
    })
}

/// Searcher holding the complete result set in memory.
///
/// Removed rows disappear from the view immediately and later rows move up;
/// added rows are listed after the accessor's rows.
#[derive(Clone)]
pub struct EagerSearcher {
    inner: Arc<EagerInner>,
}

impl EagerSearcher {
    pub fn new(source: DataSource) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<EagerInner>| EagerInner {
            _subscription: SourceSubscription::new(&source, weak.clone(), |inner, event| {
                inner.on_source_event(event)
            }),
            source,
            state: Mutex::new(EagerState::default()),
            events: EventEmitter::new(),
        });
        Self { inner }
    }

    /// Ids of every visible row, in display order.
    pub fn get_data_id_all(&self) -> Result<Vec<RecordId>> {
        let state = self.inner.state.lock();
        state.lifecycle.ensure_ready()?;
        Ok(state.records.iter().map(|row| row.record_id.clone()).collect())
    }

    /// Display index of a record.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.inner.state.lock().index.get(id).copied()
    }
}

impl DataSearcher for EagerSearcher {
    fn search(&self, param: SearchParam) -> Result<CancellableFuture<()>> {
        self.inner.start(SearchRequest::Initial(param))
    }

    fn change_search_param(&self, param: SearchParam) -> Result<CancellableFuture<()>> {
        self.inner.start(SearchRequest::Change(param))
    }

    fn refresh(&self) -> Result<CancellableFuture<()>> {
        self.inner.start(SearchRequest::Refresh)
    }

    fn get_reference(&self, range: FetchRange) -> Result<RangeReference> {
        let state = self.inner.state.lock();
        state.lifecycle.ensure_ready()?;
        let range = check_range(range, state.records.len())?;

        Ok(RangeReference::loaded(
            state.applied.clone(),
            state.fetch_param.clone(),
            range,
            state.records[range.indices()].to_vec(),
        ))
    }

    fn get_count(&self) -> Result<usize> {
        let state = self.inner.state.lock();
        state.lifecycle.ensure_ready()?;
        Ok(state.records.len())
    }

    fn get_search_param(&self) -> Option<SearchParam> {
        self.inner.state.lock().lifecycle.requested()
    }

    fn is_ready(&self) -> bool {
        self.inner.state.lock().lifecycle.is_ready()
    }

    fn events(&self) -> &EventEmitter<SearcherEvent> {
        &self.inner.events
    }

    fn data_source(&self) -> &DataSource {
        &self.inner.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::LocalAccessor;
    use crate::config::SourceConfig;
    use crate::query::{Filter, SortKey};
    use crate::EditCommand;
    use serde_json::json;

    fn searcher(rows: Vec<Record>) -> EagerSearcher {
        let accessor = Arc::new(LocalAccessor::new("id", rows));
        EagerSearcher::new(DataSource::new(accessor, SourceConfig::default()))
    }

    fn fruit() -> Vec<Record> {
        vec![
            json!({"id": "a", "name": "apple", "price": 3}),
            json!({"id": "b", "name": "banana", "price": 1}),
            json!({"id": "c", "name": "cherry", "price": 2}),
            json!({"id": "d", "name": "date", "price": 5}),
        ]
    }

    #[tokio::test]
    async fn search_loads_everything() {
        let searcher = searcher(fruit());
        searcher
            .search(SearchParam::new().sort(SortKey::asc("price")))
            .unwrap()
            .await
            .unwrap();

        assert!(searcher.is_ready());
        assert_eq!(searcher.get_count().unwrap(), 4);
        assert_eq!(searcher.get_data_id_all().unwrap(), vec!["b", "c", "a", "d"]);

        let reference = searcher.get_reference(FetchRange::new(2, 10)).unwrap();
        assert_eq!(reference.fetch_range, FetchRange::new(2, 2));
        assert!(reference.is_all_loaded());
    }

    #[tokio::test]
    async fn reads_before_ready_fail() {
        let searcher = searcher(fruit());
        assert_eq!(searcher.get_count().unwrap_err(), Error::NotYetReady);
        assert_eq!(
            searcher.change_search_param(SearchParam::new()).unwrap_err(),
            Error::NotYetReady
        );
    }

    #[tokio::test]
    async fn second_initial_search_fails() {
        let searcher = searcher(fruit());
        searcher.search(SearchParam::new()).unwrap().await.unwrap();
        assert_eq!(
            searcher.search(SearchParam::new()).unwrap_err(),
            Error::AlreadySearch
        );
    }

    #[tokio::test]
    async fn ready_fires_once() {
        let searcher = searcher(fruit());
        let (_, mut rx) = searcher.events().subscribe();

        searcher.search(SearchParam::new()).unwrap().await.unwrap();
        searcher.refresh().unwrap().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SearcherEvent::ChangeSearchStart,
                SearcherEvent::ChangeSearchSuccess,
                SearcherEvent::ReadySearch,
                SearcherEvent::ChangeSearchComplete,
                SearcherEvent::RefreshSearchStart,
                SearcherEvent::RefreshSearchSuccess,
                SearcherEvent::RefreshSearchComplete,
            ]
        );
    }

    #[tokio::test]
    async fn removal_compacts_index() {
        let searcher = searcher(fruit());
        searcher.search(SearchParam::new()).unwrap().await.unwrap();

        searcher
            .data_source()
            .edit(EditCommand::Remove {
                record: json!({"id": "b", "name": "banana", "price": 1}),
            })
            .unwrap();

        assert_eq!(searcher.get_data_id_all().unwrap(), vec!["a", "c", "d"]);
        assert_eq!(searcher.index_of("b"), None);
        assert_eq!(searcher.index_of("c"), Some(1));
        assert_eq!(searcher.index_of("d"), Some(2));
    }

    #[tokio::test]
    async fn undo_of_removal_restores_row() {
        let searcher = searcher(fruit());
        searcher.search(SearchParam::new()).unwrap().await.unwrap();
        let source = searcher.data_source().clone();

        source
            .edit(EditCommand::Remove {
                record: json!({"id": "a", "name": "apple", "price": 3}),
            })
            .unwrap();
        assert_eq!(searcher.get_count().unwrap(), 3);

        source.undo().unwrap();
        assert_eq!(searcher.get_count().unwrap(), 4);
        assert_eq!(searcher.index_of("a"), Some(3));
    }

    #[tokio::test]
    async fn added_and_updated_rows() {
        let searcher = searcher(fruit());
        searcher
            .search(SearchParam::new().filter(Filter::matches("name", "an").unwrap()))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(searcher.get_data_id_all().unwrap(), vec!["b"]);

        let source = searcher.data_source().clone();
        source
            .edit(EditCommand::Add {
                record: json!({"id": "e", "name": "elderberry", "price": 4}),
            })
            .unwrap();
        source
            .edit(EditCommand::ReplaceValue {
                record: json!({"id": "b", "name": "banana", "price": 1}),
                property: "price".into(),
                value: json!(9),
            })
            .unwrap();

        let reference = searcher.get_reference(FetchRange::new(0, 2)).unwrap();
        let rows: Vec<_> = reference.records().collect();
        assert_eq!(rows[0].edit_status, EditStatus::Updated);
        assert_eq!(rows[0].current()["price"], 9);
        assert_eq!(rows[1].edit_status, EditStatus::Added);
    }

    #[tokio::test]
    async fn edits_to_unrelated_records_are_ignored() {
        let searcher = searcher(fruit());
        searcher
            .search(SearchParam::new().filter(Filter::equals("id", json!("a"))))
            .unwrap()
            .await
            .unwrap();

        searcher
            .data_source()
            .edit(EditCommand::Remove {
                record: json!({"id": "d", "name": "date", "price": 5}),
            })
            .unwrap();
        assert_eq!(searcher.get_data_id_all().unwrap(), vec!["a"]);
    }
}
