//! Typed configuration for sources and searchers.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};

/// Default number of rows per lazy fetch window.
pub const DEFAULT_FETCH_UNIT: usize = 200;

/// Default number of rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Configuration of a [`DataSource`](crate::DataSource).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceConfig {
    /// Property holding each record's id
    pub id_property: String,
}

impl SourceConfig {
    pub fn new(id_property: impl Into<String>) -> Self {
        Self {
            id_property: id_property.into(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::new("id")
    }
}

/// Configuration of a [`LazySearcher`](crate::LazySearcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LazyConfig {
    /// Rows per fetch window; fetches are aligned to multiples of this
    pub fetch_unit: usize,
}

impl LazyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fetch_unit == 0 {
            return Err(Error::IllegalIndex("fetch unit must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for LazyConfig {
    fn default() -> Self {
        Self {
            fetch_unit: DEFAULT_FETCH_UNIT,
        }
    }
}

/// Configuration of a [`PagingSearcher`](crate::PagingSearcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PagingConfig {
    pub page_size: usize,
}

impl PagingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::IllegalIndex("page size must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
