//! Window-by-window loading for large remote result sets.

use super::{
    check_range, emit_outcome, spawn_refresh, DataSearcher, Lifecycle, LoadedItem,
    RangeReference, RequestSlot, SearchRequest, SearcherEvent, SourceSubscription,
};
use crate::{
    config::LazyConfig,
    error::Result,
    event::EventEmitter,
    query::{FetchParam, FetchRange, SearchParam, SearchResult},
    source::{DataSource, SourceEvent},
    CancellableFuture, EditedRecord, Error, RecordId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Default)]
struct LazyState {
    lifecycle: Lifecycle,
    fetch_slot: RequestSlot,
    applied: SearchParam,
    fetch_param: FetchParam,
    fetch_limit: usize,
    rows: HashMap<usize, EditedRecord>,
    index: HashMap<RecordId, usize>,
}

impl LazyState {
    fn install(&mut self, param: SearchParam, result: SearchResult<EditedRecord>) {
        self.applied = param;
        self.fetch_param = result.fetch_param;
        self.fetch_limit = result.fetch_limit;
        self.rows.clear();
        self.index.clear();

        if let Some(initial) = result.initial_data {
            self.merge(initial.fetch_range.index, initial.data);
        }
    }

    fn merge(&mut self, start: usize, data: Vec<EditedRecord>) {
        for (offset, row) in data.into_iter().enumerate() {
            let position = start + offset;
            if position >= self.fetch_limit {
                break;
            }
            if let Some(previous) = self.rows.get(&position) {
                self.index.remove(&previous.record_id);
            }
            self.index.insert(row.record_id.clone(), position);
            self.rows.insert(position, row);
        }
    }

    /// Smallest window-aligned span covering every unloaded row of `range`.
    fn missing_span(&self, range: FetchRange, unit: usize) -> Option<FetchRange> {
        let end = range.end().min(self.fetch_limit);
        let mut missing = (range.index..end).filter(|i| !self.rows.contains_key(i));
        let first = missing.next()?;
        let last = missing.last().unwrap_or(first);
        Some(window_span(first, last, unit, self.fetch_limit))
    }
}

/// Align `[first, last]` outward to window boundaries, capped at `limit`.
pub(crate) fn window_span(first: usize, last: usize, unit: usize, limit: usize) -> FetchRange {
    let start = first / unit * unit;
    let end = ((last / unit + 1) * unit).min(limit);
    FetchRange::new(start, end.saturating_sub(start))
}

struct LazyInner {
    source: DataSource,
    config: LazyConfig,
    state: Mutex<LazyState>,
    events: EventEmitter<SearcherEvent>,
    _subscription: SourceSubscription,
}

impl LazyInner {
    fn start(self: &Arc<Self>, request: SearchRequest) -> Result<CancellableFuture<()>> {
        let (generation, param, kind) = {
            let mut state = self.state.lock();
            let started = state.lifecycle.begin(request)?;
            state.fetch_slot.cancel();
            started
        };
        debug!(generation, ?kind, "lazy search started");
        self.events.emit(&kind.start());

        let future = self.source.search_data(&param);
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

                let outcome = {
                    let mut state = inner.state.lock();
                    let Some(first_ready) = state.lifecycle.settle(generation, result.is_ok())
                    else {
                        debug!(generation, "superseded lazy search dropped");
                        return Err(Error::Aborted);
                    };
                    result.map(|result| {
                        debug!(fetch_limit = result.fetch_limit, "lazy search settled");
                        state.install(param, result);
                        first_ready
                    })
                };

                emit_outcome(&inner.events, kind, &outcome);
                outcome.map(|_| ())
            },
            move || canceller.abort(),
        ))
    }

    fn reference(self: &Arc<Self>, range: FetchRange) -> Result<RangeReference> {
        let added = self.source.added_records();
        let state = self.state.lock();
        state.lifecycle.ensure_ready()?;
        let range = check_range(range, state.fetch_limit + added.len())?;

        let items: Vec<LoadedItem> = range
            .indices()
            .map(|position| match position.checked_sub(state.fetch_limit) {
                Some(tail) => LoadedItem::loaded(added[tail].clone()),
                None => state
                    .rows
                    .get(&position)
                    .cloned()
                    .map_or_else(LoadedItem::unloaded, LoadedItem::loaded),
            })
            .collect();

        let search_param = state.applied.clone();
        let fetch_param = state.fetch_param.clone();
        if items.iter().all(|item| item.is_loaded) {
            return Ok(RangeReference::from_items(
                search_param,
                fetch_param,
                range,
                items,
            ));
        }

        let weak = Arc::downgrade(self);
        Ok(RangeReference::partial(
            search_param,
            fetch_param,
            range,
            items,
            Arc::new(move || match weak.upgrade() {
                Some(inner) => inner.fetch(range),
                None => CancellableFuture::rejected(Error::Aborted),
            }),
        ))
    }

    /// Load whatever `range` is missing, then answer a fresh reference.
    fn fetch(self: &Arc<Self>, range: FetchRange) -> CancellableFuture<RangeReference> {
        let request = {
            let mut state = self.state.lock();
            if let Err(err) = state.lifecycle.ensure_ready() {
                return CancellableFuture::rejected(err);
            }
            state
                .missing_span(range, self.config.fetch_unit)
                .map(|span| {
                    let generation = state.fetch_slot.begin();
                    let search_generation = state.lifecycle.generation();
                    (span, generation, search_generation, state.fetch_param.clone())
                })
        };

        let Some((span, generation, search_generation, fetch_param)) = request else {
            return CancellableFuture::ready(self.reference(range));
        };

        debug!(index = span.index, length = span.length, "lazy window fetch");
        let future = self.source.fetch_data(&fetch_param, span);
        let canceller = future.canceller();
        self.state
            .lock()
            .fetch_slot
            .track(generation, canceller.clone());

        let weak = Arc::downgrade(self);
        CancellableFuture::with_abort_hook(
            async move {
                let result = future.await;
                let inner = weak.upgrade().ok_or(Error::Aborted)?;
                {
                    let mut state = inner.state.lock();
                    let current = state.fetch_slot.is_current(generation)
                        && state.lifecycle.generation() == search_generation;
                    if !current {
                        debug!(generation, "superseded lazy fetch dropped");
                        return Err(Error::Aborted);
                    }
                    state.fetch_slot.finish(generation);
                    state.merge(span.index, result?);
                }
                inner.reference(range)
            },
            move || canceller.abort(),
        )
    }

    fn on_source_event(self: &Arc<Self>, event: &SourceEvent) {
        match event {
            SourceEvent::Edit(edit) => self.apply_edit(&edit.record_ids),
            SourceEvent::Rollback => {
                let cached: Vec<RecordId> = self.state.lock().index.keys().cloned().collect();
                self.apply_edit(&cached);
            }
            _ => {}
        }

        self.events.emit(&SearcherEvent::Source(event.clone()));

        if matches!(
            event,
            SourceEvent::ChangeSource(_) | SourceEvent::CommitSuccess(_) | SourceEvent::Rollback
        ) {
            spawn_refresh("lazy", self.start(SearchRequest::Refresh));
        }
    }

    /// Re-project cached rows in place. Removed rows keep their position.
    fn apply_edit(&self, record_ids: &[RecordId]) {
        let mut state = self.state.lock();
        for id in record_ids {
            let Some(position) = state.index.get(id).copied() else {
                continue;
            };
            let projected = match state.rows.get(&position).and_then(|row| row.original.clone()) {
                Some(original) => self.source.apply_data(&original).ok(),
                None => self.source.project_id(id),
            };
            if let Some(row) = projected {
                state.rows.insert(position, row);
            }
        }
    }
}

/// Searcher that loads rows in aligned windows as the view asks for them.
///
/// The row count is the accessor's match count plus locally added records,
/// which follow the accessor's rows. Removed rows stay in place, marked
/// [`Removed`](crate::EditStatus::Removed).
#[derive(Clone)]
pub struct LazySearcher {
    inner: Arc<LazyInner>,
}

impl LazySearcher {
    pub fn new(source: DataSource, config: LazyConfig) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new_cyclic(|weak: &Weak<LazyInner>| LazyInner {
            _subscription: SourceSubscription::new(&source, weak.clone(), |inner, event| {
                inner.on_source_event(event)
            }),
            source,
            config,
            state: Mutex::new(LazyState::default()),
            events: EventEmitter::new(),
        });
        Ok(Self { inner })
    }

    pub fn fetch_unit(&self) -> usize {
        self.inner.config.fetch_unit
    }

    /// Number of rows currently cached.
    pub fn loaded_count(&self) -> usize {
        self.inner.state.lock().rows.len()
    }

    /// Load `range` and answer a reference to it.
    pub fn fetch(&self, range: FetchRange) -> CancellableFuture<RangeReference> {
        self.inner.fetch(range)
    }
}

impl DataSearcher for LazySearcher {
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
        self.inner.reference(range)
    }

    fn get_count(&self) -> Result<usize> {
        let added = self.inner.source.added_count();
        let state = self.inner.state.lock();
        state.lifecycle.ensure_ready()?;
        Ok(state.fetch_limit + added)
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
