//! The record table and the search snapshots served from it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gridsync_engine::{
    apply_patch, patch::parse_path, record_id_of, Error as EngineError, FetchParam, FetchRange,
    InitialData, PatchOp, Record, RecordId, SearchParam, SearchResult,
};
use indexmap::IndexMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Search snapshots kept for later fetches.
pub const MAX_RETAINED_SEARCHES: usize = 64;

/// Rows matched by one search, frozen at search time.
struct Snapshot {
    created_at: DateTime<Utc>,
    rows: Arc<Vec<Record>>,
}

/// Records keyed by id, in insertion order.
pub struct Table {
    id_property: String,
    initial_rows: usize,
    rows: RwLock<IndexMap<RecordId, Record>>,
    searches: DashMap<String, Snapshot>,
}

impl Table {
    /// Build a table from seed records. Every record needs a unique id.
    pub fn new(
        id_property: impl Into<String>,
        records: Vec<Record>,
        initial_rows: usize,
    ) -> Result<Self, EngineError> {
        let id_property = id_property.into();
        let mut rows = IndexMap::with_capacity(records.len());
        for record in records {
            let id = record_id_of(&record, &id_property)?;
            if rows.contains_key(&id) {
                return Err(EngineError::DuplicateDataId(id));
            }
            rows.insert(id, record);
        }

        Ok(Self {
            id_property,
            initial_rows,
            rows: RwLock::new(rows),
            searches: DashMap::new(),
        })
    }

    pub fn id_property(&self) -> &str {
        &self.id_property
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Number of search snapshots that can still be fetched from.
    pub fn retained_searches(&self) -> usize {
        self.searches.len()
    }

    /// Run a search and keep its rows for subsequent fetches.
    pub async fn search(&self, param: &SearchParam) -> SearchResult {
        let rows = {
            let table = self.rows.read().await;
            let all: Vec<Record> = table.values().cloned().collect();
            Arc::new(param.apply(&all))
        };

        let search_id = Uuid::new_v4().to_string();
        self.searches.insert(
            search_id.clone(),
            Snapshot {
                created_at: Utc::now(),
                rows: Arc::clone(&rows),
            },
        );
        self.evict_searches();

        let inline = rows.len().min(self.initial_rows);
        let initial_data = (inline > 0).then(|| InitialData {
            fetch_range: FetchRange::new(0, inline),
            data: rows[..inline].to_vec(),
            is_all_data: inline == rows.len(),
        });

        tracing::debug!(%search_id, matched = rows.len(), inline, "search");
        SearchResult {
            fetch_param: json!({ "searchId": search_id }),
            fetch_limit: rows.len(),
            initial_data,
        }
    }

    /// Rows of a retained search. `None` when the search is unknown or evicted.
    pub fn fetch(&self, fetch_param: &FetchParam, range: FetchRange) -> Option<Vec<Record>> {
        let search_id = fetch_param.get("searchId")?.as_str()?;
        let snapshot = self.searches.get(search_id)?;
        let range = range.clamp_to(snapshot.rows.len());
        Some(snapshot.rows[range.indices()].to_vec())
    }

    pub async fn find(&self, id: &str) -> Option<Record> {
        self.rows.read().await.get(id).cloned()
    }

    /// Apply a patch atomically: either every operation applies or none does.
    pub async fn commit(&self, patch: &[PatchOp]) -> Result<usize, EngineError> {
        self.check_added_ids(patch)?;

        let mut table = self.rows.write().await;
        apply_patch(&mut table, patch)?;
        tracing::info!(operations = patch.len(), rows = table.len(), "patch committed");
        Ok(patch.len())
    }

    /// Whole-record values must carry the id their path names.
    fn check_added_ids(&self, patch: &[PatchOp]) -> Result<(), EngineError> {
        for op in patch {
            let (PatchOp::Add { path, value } | PatchOp::Replace { path, value }) = op else {
                continue;
            };
            let (id, property) = parse_path(path)?;
            if property.is_some() {
                continue;
            }
            if record_id_of(value, &self.id_property)? != id {
                return Err(EngineError::PatchTarget { path: path.clone() });
            }
        }
        Ok(())
    }

    fn evict_searches(&self) {
        while self.searches.len() > MAX_RETAINED_SEARCHES {
            let oldest = self
                .searches
                .iter()
                .min_by_key(|entry| entry.value().created_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.searches.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_engine::{patch::property_path, Filter};

    fn table(initial_rows: usize) -> Table {
        let rows = (0..5)
            .map(|i| {
                let team = if i % 2 == 0 { "a" } else { "b" };
                json!({"id": format!("r{i}"), "team": team})
            })
            .collect();
        Table::new("id", rows, initial_rows).unwrap()
    }

    #[test]
    fn duplicate_seed_ids_are_rejected() {
        let err = Table::new("id", vec![json!({"id": "a"}), json!({"id": "a"})], 10)
            .err()
            .unwrap();
        assert_eq!(err, EngineError::DuplicateDataId("a".to_string()));
    }

    #[tokio::test]
    async fn search_then_fetch() {
        let table = table(2);
        let param = SearchParam::new().filter(Filter::equals("team", json!("a")));
        let result = table.search(&param).await;

        assert_eq!(result.fetch_limit, 3);
        let initial = result.initial_data.unwrap();
        assert_eq!(initial.data.len(), 2);
        assert!(!initial.is_all_data);

        let rest = table
            .fetch(&result.fetch_param, FetchRange::new(2, 10))
            .unwrap();
        assert_eq!(rest, vec![json!({"id": "r4", "team": "a"})]);
    }

    #[tokio::test]
    async fn unknown_search_is_not_fetched() {
        let table = table(2);
        assert!(table
            .fetch(&json!({"searchId": "nope"}), FetchRange::new(0, 1))
            .is_none());
    }

    #[tokio::test]
    async fn oversized_window_is_clamped() {
        let table = table(0);
        let result = table.search(&SearchParam::new()).await;
        let rows = table
            .fetch(&result.fetch_param, FetchRange::new(3, usize::MAX))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "r3");
    }

    #[tokio::test]
    async fn old_searches_are_evicted() {
        let table = table(0);
        for _ in 0..MAX_RETAINED_SEARCHES + 5 {
            table.search(&SearchParam::new()).await;
        }
        assert_eq!(table.retained_searches(), MAX_RETAINED_SEARCHES);
    }

    #[tokio::test]
    async fn failed_commit_changes_nothing() {
        let table = table(0);
        let patch = vec![
            PatchOp::Remove {
                path: "/r0".to_string(),
            },
            PatchOp::Test {
                path: property_path("r1", "team"),
                value: json!("z"),
            },
        ];
        let err = table.commit(&patch).await.unwrap_err();
        assert_eq!(err.key(), "PatchTest");
        assert_eq!(table.len().await, 5);
    }

    #[tokio::test]
    async fn added_record_must_match_its_path() {
        let table = table(0);
        let patch = vec![PatchOp::Add {
            path: "/x".to_string(),
            value: json!({"id": "y"}),
        }];
        assert_eq!(table.commit(&patch).await.unwrap_err().key(), "PatchTarget");

        let patch = vec![PatchOp::Add {
            path: "/x".to_string(),
            value: json!({"id": "x"}),
        }];
        assert_eq!(table.commit(&patch).await.unwrap(), 1);
        assert_eq!(table.find("x").await, Some(json!({"id": "x"})));
    }
}
