//! Search parameters, fetch ranges and the results accessors return.
//!
//! [`SearchParam`] can be evaluated in memory ([`SearchParam::apply`]) and,
//! unless it holds a predicate closure, converted to a serializable
//! [`SearchSpec`] for remote backends.

use crate::{error::Result, record::property_value, Error, Record};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Opaque token an accessor hands back from `search` for later `fetch`es.
pub type FetchParam = Value;

/// Predicate over a single property value.
pub type ValuePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A filter on one property.
#[derive(Clone)]
pub enum Filter {
    /// Property equals a value
    Equals { property: String, value: Value },
    /// Property, rendered as text, matches a regular expression
    Matches { property: String, pattern: Regex },
    /// Property satisfies a predicate
    Predicate {
        property: String,
        predicate: ValuePredicate,
    },
}

impl Filter {
    /// Exact-value filter.
    pub fn equals(property: impl Into<String>, value: Value) -> Self {
        Filter::Equals {
            property: property.into(),
            value,
        }
    }

    /// Regular expression filter.
    pub fn matches(property: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| Error::IllegalFilter(e.to_string()))?;
        Ok(Filter::Matches {
            property: property.into(),
            pattern,
        })
    }

    /// Predicate filter.
    pub fn predicate(
        property: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Filter::Predicate {
            property: property.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Property this filter inspects.
    pub fn property(&self) -> &str {
        match self {
            Filter::Equals { property, .. }
            | Filter::Matches { property, .. }
            | Filter::Predicate { property, .. } => property,
        }
    }

    /// Whether a record passes this filter.
    pub fn test(&self, record: &Record) -> bool {
        let value = property_value(record, self.property());
        match self {
            Filter::Equals { value: expected, .. } => value == *expected,
            Filter::Matches { pattern, .. } => match &value {
                Value::String(text) => pattern.is_match(text),
                Value::Number(_) | Value::Bool(_) => pattern.is_match(&value.to_string()),
                _ => false,
            },
            Filter::Predicate { predicate, .. } => predicate(&value),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Equals { property, value } => f
                .debug_struct("Equals")
                .field("property", property)
                .field("value", value)
                .finish(),
            Filter::Matches { property, pattern } => f
                .debug_struct("Matches")
                .field("property", property)
                .field("pattern", &pattern.as_str())
                .finish(),
            Filter::Predicate { property, .. } => f
                .debug_struct("Predicate")
                .field("property", property)
                .finish_non_exhaustive(),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One key of a multi-key sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    pub property: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortKey {
    /// Ascending key.
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            order: SortOrder::Asc,
        }
    }

    /// Descending key.
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            order: SortOrder::Desc,
        }
    }
}

/// What the grid asks an accessor to search for.
#[derive(Debug, Clone, Default)]
pub struct SearchParam {
    /// All filters must pass
    pub filters: Vec<Filter>,
    /// Sort keys, most significant first
    pub sorts: Vec<SortKey>,
    /// Free-form data for remote request builders
    pub extra: Value,
}

impl SearchParam {
    /// Match everything in storage order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a sort key.
    pub fn sort(mut self, key: SortKey) -> Self {
        self.sorts.push(key);
        self
    }

    /// Whether a record passes every filter.
    pub fn test(&self, record: &Record) -> bool {
        self.filters.iter().all(|filter| filter.test(record))
    }

    /// Compare two records by the sort keys.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.sorts {
            let left = property_value(a, &key.property);
            let right = property_value(b, &key.property);
            let ordering = match key.order {
                SortOrder::Asc => compare_values(&left, &right),
                SortOrder::Desc => compare_values(&right, &left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Filter and sort records in memory.
    ///
    /// Ties keep their original relative order.
    pub fn apply(&self, records: &[Record]) -> Vec<Record> {
        let mut matched: Vec<(usize, &Record)> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| self.test(record))
            .collect();

        if !self.sorts.is_empty() {
            matched.sort_by(|(ia, a), (ib, b)| self.compare(a, b).then(ia.cmp(ib)));
        }

        matched.into_iter().map(|(_, record)| record.clone()).collect()
    }

    /// Serializable form, for sending to a backend.
    pub fn to_spec(&self) -> Result<SearchSpec> {
        let filters = self
            .filters
            .iter()
            .map(|filter| match filter {
                Filter::Equals { property, value } => Ok(FilterSpec::Equals {
                    property: property.clone(),
                    value: value.clone(),
                }),
                Filter::Matches { property, pattern } => Ok(FilterSpec::Matches {
                    property: property.clone(),
                    pattern: pattern.as_str().to_string(),
                }),
                Filter::Predicate { property, .. } => Err(Error::NotSupported(format!(
                    "predicate filter on '{property}' cannot be serialized"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SearchSpec {
            filters,
            sorts: self.sorts.clone(),
            extra: self.extra.clone(),
        })
    }

    /// Rebuild from the serializable form.
    pub fn from_spec(spec: SearchSpec) -> Result<Self> {
        let filters = spec
            .filters
            .into_iter()
            .map(|filter| match filter {
                FilterSpec::Equals { property, value } => Ok(Filter::Equals { property, value }),
                FilterSpec::Matches { property, pattern } => Filter::matches(property, &pattern),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            filters,
            sorts: spec.sorts,
            extra: spec.extra,
        })
    }
}

/// Total order over JSON values used for sorting.
///
/// `null` sorts after everything else; other types are ranked
/// bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Bool(_) => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) => 3,
            Value::Object(_) => 4,
            Value::Null => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Serializable filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterSpec {
    Equals { property: String, value: Value },
    Matches { property: String, pattern: String },
}

/// Serializable search parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSpec {
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub sorts: Vec<SortKey>,
    #[serde(default)]
    pub extra: Value,
}

/// A window of rows: `length` rows starting at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchRange {
    pub index: usize,
    pub length: usize,
}

impl FetchRange {
    pub fn new(index: usize, length: usize) -> Self {
        Self { index, length }
    }

    /// One past the last index, saturating at `usize::MAX`.
    pub fn end(&self) -> usize {
        self.index.saturating_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Index iterator.
    pub fn indices(&self) -> std::ops::Range<usize> {
        self.index..self.end()
    }

    /// Shrink so the range ends at or before `count`.
    pub fn clamp_to(&self, count: usize) -> Self {
        let index = self.index.min(count);
        Self {
            index,
            length: self.end().min(count) - index,
        }
    }
}

/// Rows returned together with a search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialData<D = Record> {
    pub fetch_range: FetchRange,
    pub data: Vec<D>,
    /// Whether `data` is the complete result set
    #[serde(default)]
    pub is_all_data: bool,
}

/// Outcome of an accessor search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult<D = Record> {
    /// Token for subsequent fetches
    #[serde(default)]
    pub fetch_param: FetchParam,
    /// Total number of matching rows
    pub fetch_limit: usize,
    /// Rows delivered up front, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_data: Option<InitialData<D>>,
}

impl<D> SearchResult<D> {
    /// Convert every row, failing on the first error.
    pub fn try_map_data<E>(self, mut f: impl FnMut(D) -> Result<E>) -> Result<SearchResult<E>> {
        let initial_data = match self.initial_data {
            Some(initial) => Some(InitialData {
                fetch_range: initial.fetch_range,
                data: initial
                    .data
                    .into_iter()
                    .map(&mut f)
                    .collect::<Result<Vec<_>>>()?,
                is_all_data: initial.is_all_data,
            }),
            None => None,
        };

        Ok(SearchResult {
            fetch_param: self.fetch_param,
            fetch_limit: self.fetch_limit,
            initial_data,
        })
    }
}

/// Outcome of an accessor fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult<D = Record> {
    pub data: Vec<D>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Record> {
        vec![
            json!({"id": "a", "name": "pear", "price": 3}),
            json!({"id": "b", "name": "apple", "price": null}),
            json!({"id": "c", "name": "plum", "price": 1}),
            json!({"id": "d", "name": "peach", "price": 3}),
        ]
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r["id"].as_str().unwrap()).collect()
    }

    #[test]
    fn equals_filter() {
        let param = SearchParam::new().filter(Filter::equals("price", json!(3)));
        assert_eq!(ids(&param.apply(&rows())), vec!["a", "d"]);
    }

    #[test]
    fn regex_filter() {
        let param = SearchParam::new().filter(Filter::matches("name", "^p").unwrap());
        assert_eq!(ids(&param.apply(&rows())), vec!["a", "c", "d"]);
    }

    #[test]
    fn bad_regex() {
        let err = Filter::matches("name", "(").unwrap_err();
        assert_eq!(err.key(), "IllegalFilter");
    }

    #[test]
    fn predicate_filter() {
        let param = SearchParam::new().filter(Filter::predicate("price", |v| {
            v.as_i64().is_some_and(|p| p < 3)
        }));
        assert_eq!(ids(&param.apply(&rows())), vec!["c"]);
    }

    #[test]
    fn nulls_sort_last_ascending() {
        let param = SearchParam::new().sort(SortKey::asc("price"));
        assert_eq!(ids(&param.apply(&rows())), vec!["c", "a", "d", "b"]);
    }

    #[test]
    fn descending_with_stable_tiebreak() {
        let param = SearchParam::new().sort(SortKey::desc("price"));
        assert_eq!(ids(&param.apply(&rows())), vec!["b", "a", "d", "c"]);
    }

    #[test]
    fn multi_key_sort() {
        let param = SearchParam::new()
            .sort(SortKey::desc("price"))
            .sort(SortKey::asc("name"));
        assert_eq!(ids(&param.apply(&rows())), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn spec_roundtrip() {
        let param = SearchParam::new()
            .filter(Filter::equals("price", json!(3)))
            .filter(Filter::matches("name", "ea").unwrap())
            .sort(SortKey::asc("name"));

        let spec = param.to_spec().unwrap();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["filters"][0]["kind"], "equals");
        assert_eq!(json["sorts"][0]["order"], "asc");

        let back = SearchParam::from_spec(spec).unwrap();
        assert_eq!(ids(&back.apply(&rows())), vec!["d", "a"]);
    }

    #[test]
    fn predicate_is_not_serializable() {
        let param = SearchParam::new().filter(Filter::predicate("x", |_| true));
        assert_eq!(param.to_spec().unwrap_err().key(), "NotSupported");
    }

    #[test]
    fn clamp_range() {
        assert_eq!(FetchRange::new(8, 5).clamp_to(10), FetchRange::new(8, 2));
        assert_eq!(FetchRange::new(12, 5).clamp_to(10), FetchRange::new(10, 0));
    }

    #[test]
    fn huge_length_saturates() {
        let range = FetchRange::new(1, usize::MAX);
        assert_eq!(range.end(), usize::MAX);
        assert_eq!(range.clamp_to(5), FetchRange::new(1, 4));
        assert_eq!(FetchRange::new(usize::MAX, 1).clamp_to(3), FetchRange::new(3, 0));
    }

    #[test]
    fn search_result_wire_format() {
        let result: SearchResult = serde_json::from_value(json!({
            "fetchParam": {"token": 1},
            "fetchLimit": 2,
            "initialData": {
                "fetchRange": {"index": 0, "length": 2},
                "data": [{"id": "a"}, {"id": "b"}],
                "isAllData": true
            }
        }))
        .unwrap();
        assert_eq!(result.fetch_limit, 2);
        assert!(result.initial_data.unwrap().is_all_data);
    }
}
