use super::{DataAccessor, SourceChange};
use crate::{
    event::EventEmitter,
    query::{FetchParam, FetchRange, FetchResult, InitialData, SearchParam, SearchResult},
    record::record_id_of,
    CancellableFuture, EditLedger, EditStatus, Error, Record,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Number of search results kept for later fetches.
const RETAINED_SEARCHES: usize = 16;

struct LocalState {
    data: Vec<Record>,
    searches: VecDeque<(u64, Arc<Vec<Record>>)>,
    next_search: u64,
}

/// Accessor over an in-memory array.
///
/// Searches run synchronously and return every match inline, so searchers
/// rarely need `fetch`.
pub struct LocalAccessor {
    id_property: String,
    state: Arc<Mutex<LocalState>>,
    events: EventEmitter<SourceChange>,
}

impl LocalAccessor {
    pub fn new(id_property: impl Into<String>, data: Vec<Record>) -> Self {
        Self {
            id_property: id_property.into(),
            state: Arc::new(Mutex::new(LocalState {
                data,
                searches: VecDeque::new(),
                next_search: 1,
            })),
            events: EventEmitter::new(),
        }
    }

    /// Copy of the backing array.
    pub fn data(&self) -> Vec<Record> {
        self.state.lock().data.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    /// Swap the backing array and announce a reset.
    pub fn replace_all(&self, data: Vec<Record>) {
        {
            let mut state = self.state.lock();
            state.data = data;
            state.searches.clear();
        }
        self.events.emit(&SourceChange::reset());
    }

    fn retained(&self, param: &FetchParam) -> Option<Arc<Vec<Record>>> {
        let search_id = param.get("searchId")?.as_u64()?;
        self.state
            .lock()
            .searches
            .iter()
            .find(|(id, _)| *id == search_id)
            .map(|(_, rows)| Arc::clone(rows))
    }
}

impl DataAccessor for LocalAccessor {
    fn search(&self, param: &SearchParam) -> CancellableFuture<SearchResult> {
        let mut state = self.state.lock();
        let rows = Arc::new(param.apply(&state.data));

        let search_id = state.next_search;
        state.next_search += 1;
        state.searches.push_back((search_id, Arc::clone(&rows)));
        while state.searches.len() > RETAINED_SEARCHES {
            state.searches.pop_front();
        }
        drop(state);

        debug!(search_id, matched = rows.len(), "local search");
        CancellableFuture::resolved(SearchResult {
            fetch_param: json!({ "searchId": search_id }),
            fetch_limit: rows.len(),
            initial_data: Some(InitialData {
                fetch_range: FetchRange::new(0, rows.len()),
                data: rows.as_ref().clone(),
                is_all_data: true,
            }),
        })
    }

    fn fetch(&self, param: &FetchParam, range: FetchRange) -> CancellableFuture<FetchResult> {
        let Some(rows) = self.retained(param) else {
            return CancellableFuture::rejected(Error::NotSupported(format!(
                "fetch with unknown or expired fetch param {param}"
            )));
        };

        let range = range.clamp_to(rows.len());
        CancellableFuture::resolved(FetchResult {
            data: rows[range.indices()].to_vec(),
        })
    }

    fn find(&self, id: &str) -> CancellableFuture<Option<Record>> {
        let found = self
            .state
            .lock()
            .data
            .iter()
            .find(|record| {
                record_id_of(record, &self.id_property).is_ok_and(|record_id| record_id == id)
            })
            .cloned();
        CancellableFuture::resolved(found)
    }

    /// The backing array changes when the returned future is first polled,
    /// so a commit dropped before that leaves the data untouched.
    fn commit(&self, ledger: &EditLedger) -> CancellableFuture<Value> {
        let state = Arc::clone(&self.state);
        let ledger = ledger.clone();
        CancellableFuture::new(async move { Ok(apply_ledger(&mut state.lock(), &ledger)) })
    }

    fn events(&self) -> &EventEmitter<SourceChange> {
        &self.events
    }
}

/// Write a ledger's edits into the backing array: removals, then updates,
/// then additions.
fn apply_ledger(state: &mut LocalState, ledger: &EditLedger) -> Value {
    let before = state.data.len();
    state.data.retain(|record| {
        ledger
            .get_data_id(record)
            .map_or(true, |id| ledger.status_of(&id) != EditStatus::Removed)
    });
    let removed = before - state.data.len();

    let mut updated = 0;
    for record in state.data.iter_mut() {
        let Ok(projected) = ledger.apply_data(record) else {
            continue;
        };
        if projected.edit_status == EditStatus::Updated {
            if let Some(edited) = projected.edited {
                *record = edited;
                updated += 1;
            }
        }
    }

    let added = ledger.get_added_data_set();
    let added_count = added.len();
    state.data.extend(added);
    state.searches.clear();

    debug!(removed, updated, added = added_count, "local commit");
    json!({
        "removed": removed,
        "updated": updated,
        "added": added_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, SortKey};

    fn accessor() -> LocalAccessor {
        LocalAccessor::new(
            "id",
            vec![
                json!({"id": "a", "v": 3}),
                json!({"id": "b", "v": 1}),
                json!({"id": "c", "v": 2}),
            ],
        )
    }

    #[tokio::test]
    async fn search_returns_all_matches_inline() {
        let accessor = accessor();
        let param = SearchParam::new().sort(SortKey::asc("v"));
        let result = accessor.search(&param).await.unwrap();

        assert_eq!(result.fetch_limit, 3);
        let initial = result.initial_data.unwrap();
        assert!(initial.is_all_data);
        assert_eq!(initial.data[0]["id"], "b");
    }

    #[tokio::test]
    async fn fetch_slices_previous_search() {
        let accessor = accessor();
        let param = SearchParam::new().sort(SortKey::desc("v"));
        let result = accessor.search(&param).await.unwrap();

        let page = accessor
            .fetch(&result.fetch_param, FetchRange::new(1, 5))
            .await
            .unwrap();
        assert_eq!(page.data, vec![json!({"id": "c", "v": 2}), json!({"id": "b", "v": 1})]);
    }

    #[tokio::test]
    async fn fetch_with_unknown_param_fails() {
        let err = accessor()
            .fetch(&json!({"searchId": 99}), FetchRange::new(0, 1))
            .await
            .unwrap_err();
        assert_eq!(err.key(), "NotSupported");
    }

    #[tokio::test]
    async fn find_by_id() {
        let accessor = accessor();
        assert_eq!(accessor.find("c").await.unwrap(), Some(json!({"id": "c", "v": 2})));
        assert_eq!(accessor.find("zz").await.unwrap(), None);
    }

    #[tokio::test]
    async fn commit_applies_ledger() {
        let accessor = accessor();
        let mut ledger = EditLedger::new("id");
        ledger.remove_data(json!({"id": "b", "v": 1})).unwrap();
        ledger
            .replace_value(&json!({"id": "c", "v": 2}), "v", json!(20))
            .unwrap();
        ledger.add_data(json!({"id": "d", "v": 4})).unwrap();

        let summary = accessor.commit(&ledger).await.unwrap();
        assert_eq!(summary, json!({"removed": 1, "updated": 1, "added": 1}));
        assert_eq!(
            accessor.data(),
            vec![
                json!({"id": "a", "v": 3}),
                json!({"id": "c", "v": 20}),
                json!({"id": "d", "v": 4}),
            ]
        );
    }

    #[test]
    fn unpolled_commit_changes_nothing() {
        let accessor = accessor();
        let mut ledger = EditLedger::new("id");
        ledger.add_data(json!({"id": "d"})).unwrap();

        drop(accessor.commit(&ledger));
        assert_eq!(accessor.len(), 3);
    }

    #[tokio::test]
    async fn replace_all_announces_reset() {
        let accessor = accessor();
        let (_, mut rx) = accessor.events().subscribe();

        accessor.replace_all(vec![json!({"id": "z"})]);
        assert_eq!(rx.recv().await, Some(SourceChange::reset()));

        let param = SearchParam::new().filter(Filter::equals("id", json!("z")));
        assert_eq!(accessor.search(&param).await.unwrap().fetch_limit, 1);
    }
}
