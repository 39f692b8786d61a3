//! Searchers: the view-facing layer over a [`DataSource`].
//!
//! A searcher runs searches, caches their rows and answers
//! [`get_reference`](DataSearcher::get_reference) requests. Variants differ
//! in how much they load:
//!
//! - [`EagerSearcher`] loads the whole result set on every search.
//! - [`LazySearcher`] loads aligned windows on demand.
//! - [`PagingSearcher`] pages over another searcher.
//! - [`SingleRecordSearcher`] tracks one record by id.
//!
//! Every searcher re-emits the source's events and refreshes itself after a
//! successful commit, a rollback or a change reported by the accessor.

mod eager;
mod lazy;
mod paging;
mod reference;
mod single;

pub use eager::EagerSearcher;
pub use lazy::LazySearcher;
pub use paging::PagingSearcher;
pub use reference::{LoadedItem, RangeFetcher, RangeReference};
pub use single::SingleRecordSearcher;

use crate::{
    error::Result,
    event::{EventEmitter, ListenerId},
    query::{FetchRange, SearchParam},
    source::{DataSource, SourceEvent},
    CancellableFuture, Canceller, Error,
};
use futures::FutureExt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Events emitted by searchers.
#[derive(Debug, Clone, PartialEq)]
pub enum SearcherEvent {
    /// First successful search; emitted once
    ReadySearch,
    ChangeSearchStart,
    ChangeSearchSuccess,
    ChangeSearchError(Error),
    ChangeSearchComplete,
    RefreshSearchStart,
    RefreshSearchSuccess,
    RefreshSearchError(Error),
    RefreshSearchComplete,
    /// Current page of a paging searcher changed
    ChangePage(usize),
    /// Re-emitted event of the underlying source
    Source(SourceEvent),
}

/// The view-facing searcher contract.
pub trait DataSearcher: Send + Sync {
    /// Run the first search. Fails with [`Error::AlreadySearch`] when called twice.
    fn search(&self, param: SearchParam) -> Result<CancellableFuture<()>>;

    /// Replace the search parameter and search again.
    fn change_search_param(&self, param: SearchParam) -> Result<CancellableFuture<()>>;

    /// Search again with the current parameter.
    fn refresh(&self) -> Result<CancellableFuture<()>>;

    /// Rows in `range`, loaded or not. Ranges running past the end are clamped.
    fn get_reference(&self, range: FetchRange) -> Result<RangeReference>;

    /// Number of rows the view should display.
    fn get_count(&self) -> Result<usize>;

    /// Parameter of the latest search request.
    fn get_search_param(&self) -> Option<SearchParam>;

    fn is_ready(&self) -> bool;

    fn events(&self) -> &EventEmitter<SearcherEvent>;

    fn data_source(&self) -> &DataSource;
}

/// Which pair of life-cycle events a search emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchKind {
    Change,
    Refresh,
}

impl SearchKind {
    pub(crate) fn start(self) -> SearcherEvent {
        match self {
            SearchKind::Change => SearcherEvent::ChangeSearchStart,
            SearchKind::Refresh => SearcherEvent::RefreshSearchStart,
        }
    }

    fn success(self) -> SearcherEvent {
        match self {
            SearchKind::Change => SearcherEvent::ChangeSearchSuccess,
            SearchKind::Refresh => SearcherEvent::RefreshSearchSuccess,
        }
    }

    fn error(self, err: Error) -> SearcherEvent {
        match self {
            SearchKind::Change => SearcherEvent::ChangeSearchError(err),
            SearchKind::Refresh => SearcherEvent::RefreshSearchError(err),
        }
    }

    fn complete(self) -> SearcherEvent {
        match self {
            SearchKind::Change => SearcherEvent::ChangeSearchComplete,
            SearchKind::Refresh => SearcherEvent::RefreshSearchComplete,
        }
    }
}

/// A search request as issued through the [`DataSearcher`] methods.
pub(crate) enum SearchRequest {
    Initial(SearchParam),
    Change(SearchParam),
    Refresh,
}

/// One outstanding request per slot. Starting a request aborts the previous
/// one; results are applied only while their generation is current.
#[derive(Debug, Default)]
pub(crate) struct RequestSlot {
    generation: u64,
    current: Option<Canceller>,
}

impl RequestSlot {
    /// Abort the outstanding request and open a new generation.
    pub(crate) fn begin(&mut self) -> u64 {
        self.cancel();
        self.generation
    }

    pub(crate) fn track(&mut self, generation: u64, canceller: Canceller) {
        if generation == self.generation {
            self.current = Some(canceller);
        }
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn finish(&mut self, generation: u64) {
        if generation == self.generation {
            self.current = None;
        }
    }

    /// Abort the outstanding request, if any, and invalidate its generation.
    pub(crate) fn cancel(&mut self) {
        if let Some(canceller) = self.current.take() {
            debug!(generation = self.generation, "aborting outstanding request");
            canceller.abort();
        }
        self.generation += 1;
    }
}

/// Search life cycle shared by the list searchers.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    requested: Option<SearchParam>,
    ready: bool,
    slot: RequestSlot,
}

impl Lifecycle {
    /// Validate a request against the life cycle and open a generation for it.
    pub(crate) fn begin(&mut self, request: SearchRequest) -> Result<(u64, SearchParam, SearchKind)> {
        let (param, kind) = match request {
            SearchRequest::Initial(param) => {
                if self.requested.is_some() {
                    return Err(Error::AlreadySearch);
                }
                (param, SearchKind::Change)
            }
            SearchRequest::Change(param) => {
                if self.requested.is_none() {
                    return Err(Error::NotYetReady);
                }
                (param, SearchKind::Change)
            }
            SearchRequest::Refresh => {
                let param = self.requested.clone().ok_or(Error::NotYetReady)?;
                (param, SearchKind::Refresh)
            }
        };

        self.requested = Some(param.clone());
        Ok((self.slot.begin(), param, kind))
    }

    pub(crate) fn track(&mut self, generation: u64, canceller: Canceller) {
        self.slot.track(generation, canceller);
    }

    /// Close a generation. `None` when it was superseded; otherwise whether
    /// this is the first successful search.
    pub(crate) fn settle(&mut self, generation: u64, succeeded: bool) -> Option<bool> {
        if !self.slot.is_current(generation) {
            return None;
        }
        self.slot.finish(generation);

        let first_ready = succeeded && !self.ready;
        if succeeded {
            self.ready = true;
        }
        Some(first_ready)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.slot.generation()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn requested(&self) -> Option<SearchParam> {
        self.requested.clone()
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(Error::NotYetReady)
        }
    }
}

/// Emit the closing events of a search. `outcome` carries the first-ready flag.
pub(crate) fn emit_outcome(
    events: &EventEmitter<SearcherEvent>,
    kind: SearchKind,
    outcome: &Result<bool>,
) {
    match outcome {
        Ok(first_ready) => {
            events.emit(&kind.success());
            if *first_ready {
                events.emit(&SearcherEvent::ReadySearch);
            }
        }
        Err(err) => events.emit(&kind.error(err.clone())),
    }
    events.emit(&kind.complete());
}

/// Validate a requested range against the row count and clamp its end.
pub(crate) fn check_range(range: FetchRange, count: usize) -> Result<FetchRange> {
    if range.is_empty() {
        return Err(Error::IllegalIndex(format!(
            "empty range at index {}",
            range.index
        )));
    }
    if range.index > count {
        return Err(Error::IndexOutOfBounds {
            index: range.index,
            count,
        });
    }
    Ok(range.clamp_to(count))
}

/// Run a refresh in the background.
///
/// On a tokio runtime the refresh is spawned. Without one it is polled in
/// place: accessors that answer synchronously finish right away, anything
/// still pending is aborted so the searcher reports the failed refresh.
pub(crate) fn spawn_refresh<T: Send + 'static>(
    searcher: &'static str,
    request: Result<CancellableFuture<T>>,
) {
    let mut future = match request {
        Ok(future) => future,
        Err(Error::NotYetReady) => return,
        Err(err) => {
            warn!(searcher, error = %err, "refresh could not start");
            return;
        }
    };

    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { report_refresh(searcher, future.await) });
        return;
    }

    let outcome = match (&mut future).now_or_never() {
        Some(outcome) => outcome,
        None => {
            warn!(searcher, "no tokio runtime and the accessor is pending; refresh aborted");
            future.abort();
            (&mut future).now_or_never().unwrap_or(Err(Error::Aborted))
        }
    };
    report_refresh(searcher, outcome);
}

fn report_refresh<T>(searcher: &'static str, outcome: Result<T>) {
    if let Err(err) = outcome {
        if !err.is_aborted() {
            warn!(searcher, error = %err, "background refresh failed");
        }
    }
}

/// Listener registration on a source, removed on drop.
pub(crate) struct SourceSubscription {
    source: DataSource,
    listener: ListenerId,
}

impl SourceSubscription {
    /// Forward source events to `target` for as long as it is alive.
    pub(crate) fn new<T, F>(source: &DataSource, target: Weak<T>, handler: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Arc<T>, &SourceEvent) + Send + Sync + 'static,
    {
        let listener = source.events().on(move |event: &SourceEvent| {
            if let Some(target) = target.upgrade() {
                handler(&target, event);
            }
        });
        Self {
            source: source.clone(),
            listener,
        }
    }
}

impl Drop for SourceSubscription {
    fn drop(&mut self) {
        self.source.events().off(self.listener);
    }
}
