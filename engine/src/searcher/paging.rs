//! Page-number view over another searcher.

use super::{check_range, DataSearcher, RangeReference, SearcherEvent};
use crate::{
    config::PagingConfig,
    error::Result,
    event::{EventEmitter, ListenerId},
    query::{FetchParam, FetchRange, SearchParam},
    source::{DataSource, SourceEvent},
    CancellableFuture, Error,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

struct PagingInner {
    delegate: Arc<dyn DataSearcher>,
    page_size: usize,
    page: Mutex<usize>,
    events: EventEmitter<SearcherEvent>,
    listener: ListenerId,
}

impl PagingInner {
    fn page_count(&self) -> Result<usize> {
        let total = self.delegate.get_count()?;
        Ok(total.div_ceil(self.page_size).max(1))
    }

    fn on_delegate_event(&self, event: &SearcherEvent) {
        self.events.emit(event);

        let may_shrink = matches!(
            event,
            SearcherEvent::ChangeSearchSuccess
                | SearcherEvent::RefreshSearchSuccess
                | SearcherEvent::Source(SourceEvent::Edit(_))
        );
        if may_shrink {
            self.clamp_page();
        }
    }

    /// Move back to the last page when the current one no longer exists.
    fn clamp_page(&self) {
        let Ok(page_count) = self.page_count() else {
            return;
        };
        let clamped = {
            let mut page = self.page.lock();
            if *page < page_count {
                return;
            }
            *page = page_count - 1;
            *page
        };
        debug!(page = clamped, "page clamped after the row count shrank");
        self.events.emit(&SearcherEvent::ChangePage(clamped));
    }

    fn set_page(&self, page: usize) {
        let changed = {
            let mut current = self.page.lock();
            let changed = *current != page;
            *current = page;
            changed
        };
        if changed {
            self.events.emit(&SearcherEvent::ChangePage(page));
        }
    }
}

impl Drop for PagingInner {
    fn drop(&mut self) {
        self.delegate.events().off(self.listener);
    }
}

/// Pages over another searcher.
///
/// Indices passed to [`get_reference`](DataSearcher::get_reference) and the
/// count returned by [`get_count`](DataSearcher::get_count) are relative to
/// the current page. References report absolute fetch ranges.
#[derive(Clone)]
pub struct PagingSearcher {
    inner: Arc<PagingInner>,
}

impl PagingSearcher {
    pub fn new(delegate: Arc<dyn DataSearcher>, config: PagingConfig) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new_cyclic(|weak: &Weak<PagingInner>| {
            let weak = weak.clone();
            let listener = delegate.events().on(move |event: &SearcherEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_delegate_event(event);
                }
            });
            PagingInner {
                delegate,
                page_size: config.page_size,
                page: Mutex::new(0),
                events: EventEmitter::new(),
                listener,
            }
        });
        Ok(Self { inner })
    }

    pub fn delegate(&self) -> &Arc<dyn DataSearcher> {
        &self.inner.delegate
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Zero-based current page.
    pub fn page(&self) -> usize {
        *self.inner.page.lock()
    }

    /// Number of pages; an empty result still has one page.
    pub fn page_count(&self) -> Result<usize> {
        self.inner.page_count()
    }

    /// Row count of the delegate.
    pub fn total_count(&self) -> Result<usize> {
        self.inner.delegate.get_count()
    }

    /// Jump to a page.
    pub fn set_page(&self, page: usize) -> Result<()> {
        let page_count = self.inner.page_count()?;
        if page >= page_count {
            return Err(Error::IndexOutOfBounds {
                index: page,
                count: page_count,
            });
        }
        self.inner.set_page(page);
        Ok(())
    }

    /// Absolute window of the current page.
    pub fn page_range(&self) -> Result<FetchRange> {
        let total = self.inner.delegate.get_count()?;
        let start = self.page() * self.inner.page_size;
        Ok(FetchRange::new(start, self.inner.page_size).clamp_to(total))
    }
}

impl DataSearcher for PagingSearcher {
    fn search(&self, param: SearchParam) -> Result<CancellableFuture<()>> {
        self.inner.delegate.search(param)
    }

    fn change_search_param(&self, param: SearchParam) -> Result<CancellableFuture<()>> {
        let future = self.inner.delegate.change_search_param(param)?;
        self.inner.set_page(0);
        Ok(future)
    }

    fn refresh(&self) -> Result<CancellableFuture<()>> {
        self.inner.delegate.refresh()
    }

    fn get_reference(&self, range: FetchRange) -> Result<RangeReference> {
        let page = self.page_range()?;
        let range = check_range(range, page.length)?;
        if range.is_empty() {
            // nothing left on this page; the delegate rejects empty ranges
            return Ok(RangeReference::loaded(
                self.get_search_param().unwrap_or_default(),
                FetchParam::Null,
                FetchRange::new(page.index + range.index, 0),
                Vec::new(),
            ));
        }
        self.inner
            .delegate
            .get_reference(FetchRange::new(page.index + range.index, range.length))
    }

    fn get_count(&self) -> Result<usize> {
        Ok(self.page_range()?.length)
    }

    fn get_search_param(&self) -> Option<SearchParam> {
        self.inner.delegate.get_search_param()
    }

    fn is_ready(&self) -> bool {
        self.inner.delegate.is_ready()
    }

    fn events(&self) -> &EventEmitter<SearcherEvent> {
        &self.inner.events
    }

    fn data_source(&self) -> &DataSource {
        self.inner.delegate.data_source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::LocalAccessor;
    use crate::config::SourceConfig;
    use crate::searcher::EagerSearcher;
    use crate::EditCommand;
    use serde_json::json;

    async fn paging(rows: usize, page_size: usize) -> PagingSearcher {
        let data = (0..rows).map(|i| json!({"id": format!("r{i}")})).collect();
        let accessor = Arc::new(LocalAccessor::new("id", data));
        let source = DataSource::new(accessor, SourceConfig::default());
        let eager: Arc<dyn DataSearcher> = Arc::new(EagerSearcher::new(source));
        let paging = PagingSearcher::new(eager, PagingConfig { page_size }).unwrap();
        paging.search(SearchParam::new()).unwrap().await.unwrap();
        paging
    }

    #[tokio::test]
    async fn page_relative_indices() {
        let paging = paging(25, 10).await;
        assert_eq!(paging.page_count().unwrap(), 3);

        paging.set_page(2).unwrap();
        assert_eq!(paging.get_count().unwrap(), 5);

        let reference = paging.get_reference(FetchRange::new(1, 10)).unwrap();
        assert_eq!(reference.fetch_range, FetchRange::new(21, 4));
        assert_eq!(reference.records().next().unwrap().record_id, "r21");
    }

    #[tokio::test]
    async fn empty_result_has_an_empty_page() {
        let paging = paging(0, 10).await;
        assert_eq!(paging.get_count().unwrap(), 0);

        let reference = paging.get_reference(FetchRange::new(0, 10)).unwrap();
        assert!(reference.is_empty());
        assert!(reference.is_all_loaded());
        assert_eq!(reference.fetch_range, FetchRange::new(0, 0));
    }

    #[tokio::test]
    async fn range_at_page_end_is_empty() {
        let paging = paging(25, 10).await;
        paging.set_page(2).unwrap();

        let reference = paging.get_reference(FetchRange::new(5, 3)).unwrap();
        assert!(reference.is_empty());
        assert_eq!(reference.fetch_range, FetchRange::new(25, 0));
    }

    #[tokio::test]
    async fn set_page_out_of_range() {
        let paging = paging(25, 10).await;
        assert!(matches!(
            paging.set_page(3),
            Err(Error::IndexOutOfBounds { index: 3, count: 3 })
        ));
    }

    #[tokio::test]
    async fn page_clamps_when_rows_disappear() {
        let paging = paging(11, 10).await;
        paging.set_page(1).unwrap();
        let (_, mut rx) = paging.events().subscribe();

        paging
            .data_source()
            .edit(EditCommand::Remove {
                record: json!({"id": "r10"}),
            })
            .unwrap();

        assert_eq!(paging.page(), 0);
        let mut pages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SearcherEvent::ChangePage(page) = event {
                pages.push(page);
            }
        }
        assert_eq!(pages, vec![0]);
    }

    #[tokio::test]
    async fn changing_search_returns_to_first_page() {
        let paging = paging(25, 10).await;
        paging.set_page(1).unwrap();
        paging
            .change_search_param(SearchParam::new())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(paging.page(), 0);
    }

    #[test]
    fn zero_page_size_is_illegal() {
        let accessor = Arc::new(LocalAccessor::new("id", vec![]));
        let source = DataSource::new(accessor, SourceConfig::default());
        let eager: Arc<dyn DataSearcher> = Arc::new(EagerSearcher::new(source));
        let err = PagingSearcher::new(eager, PagingConfig { page_size: 0 })
            .err()
            .unwrap();
        assert_eq!(err.key(), "IllegalIndex");
    }
}
