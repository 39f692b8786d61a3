//! Search and fetch handlers.

use crate::db::Table;
use crate::error::{AppError, Result};
use gridsync_engine::{accessor::FetchRequest, FetchResult, SearchParam, SearchResult, SearchSpec};

/// Run a search. Filters with an invalid pattern are rejected.
pub async fn handle_search(table: &Table, spec: SearchSpec) -> Result<SearchResult> {
    let param = SearchParam::from_spec(spec)?;
    Ok(table.search(&param).await)
}

/// Serve a window of a previous search.
pub fn handle_fetch(table: &Table, request: FetchRequest) -> Result<FetchResult> {
    let data = table
        .fetch(&request.fetch_param, request.range)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "unknown or expired fetch param {}",
                request.fetch_param
            ))
        })?;
    Ok(FetchResult { data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_engine::{FetchRange, FilterSpec};
    use serde_json::json;

    #[tokio::test]
    async fn invalid_pattern_is_rejected() {
        let table = Table::new("id", vec![], 10).unwrap();
        let spec = SearchSpec {
            filters: vec![FilterSpec::Matches {
                property: "name".to_string(),
                pattern: "(".to_string(),
            }],
            ..SearchSpec::default()
        };
        let err = handle_search(&table, spec).await.unwrap_err();
        assert!(matches!(err, AppError::Engine(_)));
    }

    #[test]
    fn expired_fetch_is_a_bad_request() {
        let table = Table::new("id", vec![], 10).unwrap();
        let request = FetchRequest {
            fetch_param: json!({"searchId": "gone"}),
            range: FetchRange::new(0, 10),
        };
        assert!(matches!(
            handle_fetch(&table, request),
            Err(AppError::BadRequest(_))
        ));
    }
}
