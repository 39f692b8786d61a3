//! Integration tests for the grid protocol.
//!
//! Each test starts the server on an ephemeral port and talks to it over HTTP,
//! either directly or through the engine's `RemoteAccessor`.

use gridsync_engine::{
    accessor::{RemoteAccessor, ReqwestTransport},
    CommandBuilder, DataSearcher, DataSource, FetchRange, LazyConfig, LazySearcher, Record,
    SearchParam, SingleRecordSearcher, SourceConfig, SourceEvent,
};
use gridsync_server::config::Config;
use gridsync_server::db::Table;
use gridsync_server::{app, AppState};
use serde_json::{json, Value};
use std::sync::Arc;

fn seed() -> Vec<Record> {
    (0..5)
        .map(|i| json!({"id": format!("r{i}"), "name": format!("Row {i}"), "rank": i}))
        .collect()
}

/// Start a server and return its base URL.
async fn spawn_server(records: Vec<Record>, initial_rows: usize) -> String {
    let config = Config {
        initial_rows,
        ..Config::default()
    };
    let table = Table::new(config.id_property.clone(), records, initial_rows).unwrap();
    let app = app(AppState::new(config, table));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn remote_source(base: &str) -> DataSource {
    let accessor = Arc::new(RemoteAccessor::rest(base, Arc::new(ReqwestTransport::new())));
    DataSource::new(accessor, SourceConfig::default())
}

#[tokio::test]
async fn health_reports_record_count() {
    let base = spawn_server(seed(), 10).await;

    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["records"], 5);
    assert_eq!(body["idProperty"], "id");
    assert_eq!(body["retainedSearches"], 0);
}

#[tokio::test]
async fn search_and_fetch_over_http() {
    let base = spawn_server(seed(), 2).await;
    let client = reqwest::Client::new();

    let search: Value = client
        .post(format!("{base}/search"))
        .json(&json!({
            "filters": [{"kind": "matches", "property": "name", "pattern": "^Row [1-4]$"}],
            "sorts": [{"property": "rank", "order": "desc"}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(search["fetchLimit"], 4);
    assert_eq!(search["initialData"]["data"][0]["id"], "r4");
    assert_eq!(search["initialData"]["isAllData"], false);

    let fetched: Value = client
        .post(format!("{base}/fetch"))
        .json(&json!({"fetchParam": search["fetchParam"], "index": 2, "length": 5}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let ids: Vec<&str> = fetched["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["r2", "r1"]);
}

#[tokio::test]
async fn fetch_with_maximal_length_is_clamped() {
    let base = spawn_server(seed(), 0).await;
    let client = reqwest::Client::new();

    let search: Value = client
        .post(format!("{base}/search"))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let response = client
        .post(format!("{base}/fetch"))
        .json(&json!({"fetchParam": search["fetchParam"], "index": 1, "length": u64::MAX}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let fetched: Value = response.json().await.unwrap();
    assert_eq!(fetched["data"].as_array().unwrap().len(), 4);
    assert_eq!(fetched["data"][0]["id"], "r1");
}

#[tokio::test]
async fn invalid_filter_is_bad_request() {
    let base = spawn_server(seed(), 2).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/search"))
        .json(&json!({"filters": [{"kind": "matches", "property": "name", "pattern": "("}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["key"], "IllegalFilter");
}

#[tokio::test]
async fn stale_commit_conflicts() {
    let base = spawn_server(seed(), 2).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/commit"))
        .json(&json!([
            {"op": "remove", "path": "/r0"},
            {"op": "test", "path": "/r1/rank", "value": 99},
            {"op": "replace", "path": "/r1/rank", "value": 100}
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);

    // nothing was applied
    let found = reqwest::get(format!("{base}/records/r0")).await.unwrap();
    assert_eq!(found.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn lazy_searcher_over_remote_accessor() {
    let base = spawn_server(seed(), 2).await;
    let source = remote_source(&base);
    let lazy = LazySearcher::new(source.clone(), LazyConfig { fetch_unit: 2 }).unwrap();

    lazy.search(SearchParam::new()).unwrap().await.unwrap();
    assert_eq!(lazy.get_count().unwrap(), 5);

    let partial = lazy.get_reference(FetchRange::new(0, 5)).unwrap();
    assert!(!partial.is_all_loaded());

    let full = partial.fetch().await.unwrap();
    let ids: Vec<_> = full.records().map(|row| row.record_id.as_str()).collect();
    assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4"]);
}

#[tokio::test]
async fn edits_commit_through_remote_accessor() {
    let base = spawn_server(seed(), 10).await;
    let source = remote_source(&base);

    let command = CommandBuilder::new()
        .replace_value(json!({"id": "r1", "name": "Row 1", "rank": 1}), "name", json!("First"))
        .remove_data(json!({"id": "r2", "name": "Row 2", "rank": 2}))
        .add_data(json!({"id": "n1", "name": "New", "rank": 9}))
        .into_command();
    source.edit(command).unwrap();

    let (_, mut rx) = source.events().subscribe();
    let reply = source.commit().unwrap().await.unwrap();
    assert_eq!(reply["applied"], 5);
    assert!(reply["commitId"].is_string());
    assert!(!source.has_change());

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.first(), Some(&SourceEvent::CommitStart));
    assert_eq!(events.last(), Some(&SourceEvent::CommitComplete));

    let single = SingleRecordSearcher::new(source.clone());
    let renamed = single.change_data_id("r1").unwrap().await.unwrap().unwrap();
    assert_eq!(renamed.current()["name"], "First");
    assert!(single.change_data_id("r2").unwrap().await.unwrap().is_none());
    assert!(single.change_data_id("n1").unwrap().await.unwrap().is_some());
}

#[tokio::test]
async fn conflicting_commit_keeps_edits() {
    let base = spawn_server(seed(), 10).await;
    let source = remote_source(&base);
    source
        .edit(
            CommandBuilder::new()
                .replace_value(json!({"id": "r3", "name": "Row 3", "rank": 3}), "rank", json!(30))
                .into_command(),
        )
        .unwrap();

    // another client changes the row first
    reqwest::Client::new()
        .post(format!("{base}/commit"))
        .json(&json!([{"op": "replace", "path": "/r3/rank", "value": 31}]))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let err = source.commit().unwrap().await.unwrap_err();
    assert_eq!(err.key(), "Transport");
    assert!(source.has_change());
    assert!(!source.is_committing());
}
