//! Row ranges handed to the view, possibly only partly loaded.

use crate::{
    query::{FetchParam, FetchRange, SearchParam},
    CancellableFuture, EditedRecord,
};
use std::fmt;
use std::sync::Arc;

/// Loads the unloaded part of a reference and returns the full reference.
pub type RangeFetcher = Arc<dyn Fn() -> CancellableFuture<RangeReference> + Send + Sync>;

/// One row slot of a [`RangeReference`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedItem {
    pub is_loaded: bool,
    pub data: Option<EditedRecord>,
}

impl LoadedItem {
    pub fn loaded(record: EditedRecord) -> Self {
        Self {
            is_loaded: true,
            data: Some(record),
        }
    }

    pub fn unloaded() -> Self {
        Self {
            is_loaded: false,
            data: None,
        }
    }
}

/// A requested range of rows, with whatever of it was already loaded.
///
/// References are immutable; [`fetch`](Self::fetch) produces a new, fully
/// loaded reference.
#[derive(Clone)]
pub struct RangeReference {
    pub search_param: SearchParam,
    pub fetch_param: FetchParam,
    pub fetch_range: FetchRange,
    pub loaded_data: Vec<LoadedItem>,
    fetcher: Option<RangeFetcher>,
}

impl RangeReference {
    /// A reference whose rows are all loaded.
    pub fn loaded(
        search_param: SearchParam,
        fetch_param: FetchParam,
        fetch_range: FetchRange,
        data: Vec<EditedRecord>,
    ) -> Self {
        Self {
            search_param,
            fetch_param,
            fetch_range,
            loaded_data: data.into_iter().map(LoadedItem::loaded).collect(),
            fetcher: None,
        }
    }

    /// A reference over already resolved slots.
    pub fn from_items(
        search_param: SearchParam,
        fetch_param: FetchParam,
        fetch_range: FetchRange,
        loaded_data: Vec<LoadedItem>,
    ) -> Self {
        Self {
            search_param,
            fetch_param,
            fetch_range,
            loaded_data,
            fetcher: None,
        }
    }

    /// A reference that may contain unloaded rows.
    pub fn partial(
        search_param: SearchParam,
        fetch_param: FetchParam,
        fetch_range: FetchRange,
        loaded_data: Vec<LoadedItem>,
        fetcher: RangeFetcher,
    ) -> Self {
        Self {
            search_param,
            fetch_param,
            fetch_range,
            loaded_data,
            fetcher: Some(fetcher),
        }
    }

    pub fn len(&self) -> usize {
        self.loaded_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded_data.is_empty()
    }

    pub fn is_all_loaded(&self) -> bool {
        self.loaded_data.iter().all(|item| item.is_loaded)
    }

    /// Loaded rows, in order, skipping unloaded slots.
    pub fn records(&self) -> impl Iterator<Item = &EditedRecord> {
        self.loaded_data.iter().filter_map(|item| item.data.as_ref())
    }

    /// Load the remaining rows.
    pub fn fetch(&self) -> CancellableFuture<RangeReference> {
        match &self.fetcher {
            Some(fetcher) if !self.is_all_loaded() => fetcher(),
            _ => CancellableFuture::resolved(self.clone()),
        }
    }
}

impl fmt::Debug for RangeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeReference")
            .field("search_param", &self.search_param)
            .field("fetch_param", &self.fetch_param)
            .field("fetch_range", &self.fetch_range)
            .field("loaded_data", &self.loaded_data)
            .finish_non_exhaustive()
    }
}
