//! Result reconstruction tests against the in-memory backend.

mod common;

use std::sync::Arc;

use common::{FakeBackend, MemoryRows, client};
use helios_index_bridge::client::{HttpMethod, RequestBody};
use helios_index_bridge::marshal::{CellType, IndexSchema};
use helios_index_bridge::search::{
    AggregationKind, ExecuteOptions, FilterExpression, ResultReconstructor,
    SearchRequest,
};
use helios_index_bridge::types::{CellValue, PrimaryKey, Row};
use serde_json::{Value, json};

const INDEX: &str = "library.books";

fn schema() -> IndexSchema {
    IndexSchema::new()
        .partition_key("author", CellType::Text)
        .clustering_key("year", CellType::Int)
        .field("title", CellType::Text)
        .field("pages", CellType::Int)
}

fn key(author: &str, year: i64) -> PrimaryKey {
    PrimaryKey::new(vec![CellValue::Text(author.into())]).with_clustering(vec![CellValue::Int(year)])
}

/// Stores a book both in the search index and in the primary store.
fn store(backend: &FakeBackend, rows: &MemoryRows, author: &str, year: i64, pages: i64) {
    let key = key(author, year);
    backend.seed_document(
        INDEX,
        &key.document_id(),
        json!({"author": author, "year": year, "pages": pages}),
    );
    rows.insert(
        Row::new(key)
            .with_cell("title", CellValue::Text(format!("{author} {year}")))
            .with_cell("pages", CellValue::Int(pages)),
    );
}

fn reconstructor(backend: &Arc<FakeBackend>, rows: &Arc<MemoryRows>) -> ResultReconstructor {
    ResultReconstructor::new(client(backend), Arc::new(schema()), rows.clone(), "search_result")
}

fn synthetic(row: &Row) -> Value {
    match row.cell("search_result") {
        Some(CellValue::Text(text)) => serde_json::from_str(text).unwrap(),
        other => panic!("unexpected synthetic cell: {other:?}"),
    }
}

#[tokio::test]
async fn test_rows_are_read_from_primary_store() {
    let backend = FakeBackend::new();
    let rows = MemoryRows::new();
    store(&backend, &rows, "tolkien", 1954, 352);

    let results = reconstructor(&backend, &rows)
        .execute(INDEX, &SearchRequest::new(FilterExpression::match_all()), ExecuteOptions::default())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let row = &results[0];
    assert_eq!(row.key, key("tolkien", 1954));
    assert_eq!(row.cell("title"), Some(&CellValue::Text("tolkien 1954".into())));
    assert_eq!(synthetic(row)["pages"], 352);
}

#[tokio::test]
async fn test_stale_hits_yield_no_rows() {
    let backend = FakeBackend::new();
    let rows = MemoryRows::new();
    store(&backend, &rows, "tolkien", 1954, 352);
    store(&backend, &rows, "tolkien", 1955, 416);
    rows.remove(&key("tolkien", 1954));
    rows.remove(&key("tolkien", 1955));

    let mut results = reconstructor(&backend, &rows)
        .execute(INDEX, &SearchRequest::new(FilterExpression::match_all()), ExecuteOptions::default())
        .await
        .unwrap();

    assert!(results.next().await.is_none());
    let stats = results.stats();
    assert_eq!(stats.hits_seen, 2);
    assert_eq!(stats.rows_emitted, 0);
    assert_eq!(stats.stale_hits_dropped, 2);
}

#[tokio::test]
async fn test_stale_hits_are_skipped_among_live_ones() {
    let backend = FakeBackend::new();
    let rows = MemoryRows::new();
    store(&backend, &rows, "asimov", 1951, 255);
    store(&backend, &rows, "tolkien", 1954, 352);
    rows.remove(&key("asimov", 1951));

    let mut results = reconstructor(&backend, &rows)
        .execute(INDEX, &SearchRequest::new(FilterExpression::match_all()), ExecuteOptions::default())
        .await
        .unwrap();

    let row = results.next().await.unwrap().unwrap();
    assert_eq!(row.key, key("tolkien", 1954));
    assert!(results.next().await.is_none());
    assert_eq!(results.stats().stale_hits_dropped, 1);
}

#[tokio::test]
async fn test_scroll_continuation_does_not_resend_query() {
    let backend = FakeBackend::new();
    let rows = MemoryRows::new();
    for year in 1950..1955 {
        store(&backend, &rows, "asimov", year, 200);
    }
    backend.clear_requests();

    let request = SearchRequest::new(FilterExpression::leaf("author", "term", json!("asimov")))
        .with_size(2);
    let options = ExecuteOptions {
        refresh: false,
        scroll: true,
    };
    let mut results = reconstructor(&backend, &rows)
        .execute(INDEX, &request, options)
        .await
        .unwrap();

    let mut years = Vec::new();
    while let Some(row) = results.next().await {
        match row.unwrap().key.clustering.as_slice() {
            [CellValue::Int(year)] => years.push(*year),
            other => panic!("unexpected clustering key: {other:?}"),
        }
    }

    assert_eq!(years, vec![1950, 1951, 1952, 1953, 1954]);
    assert_eq!(results.stats().pages, 4);

    let searches = backend.requests_to(HttpMethod::Post, "/library.books/_search");
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0].query_param("scroll"), Some("1m"));

    let scrolls = backend.requests_to(HttpMethod::Post, "/_search/scroll");
    assert_eq!(scrolls.len(), 3);
    for request in &scrolls {
        let RequestBody::Json(body) = &request.body else {
            panic!("scroll request without JSON body");
        };
        assert!(body.get("query").is_none());
        assert_eq!(body["scroll_id"], "scroll-1");
        assert_eq!(body["scroll"], "1m");
    }

    assert_eq!(backend.open_scrolls(), 0);
    assert_eq!(
        backend
            .requests_to(HttpMethod::Delete, "/_search/scroll/scroll-1")
            .len(),
        1
    );
}

#[tokio::test]
async fn test_close_releases_scroll_early() {
    let backend = FakeBackend::new();
    let rows = MemoryRows::new();
    for year in 1950..1955 {
        store(&backend, &rows, "asimov", year, 200);
    }

    let request = SearchRequest::new(FilterExpression::match_all()).with_size(2);
    let options = ExecuteOptions {
        refresh: false,
        scroll: true,
    };
    let mut results = reconstructor(&backend, &rows)
        .execute(INDEX, &request, options)
        .await
        .unwrap();
    results.next().await.unwrap().unwrap();
    assert_eq!(backend.open_scrolls(), 1);

    results.close().await;
    assert_eq!(backend.open_scrolls(), 0);
}

#[tokio::test]
async fn test_multi_component_key_split() {
    let backend = FakeBackend::new();
    let rows = MemoryRows::new();
    let schema = IndexSchema::new()
        .partition_key("p1", CellType::Text)
        .partition_key("p2", CellType::Int)
        .clustering_key("c1", CellType::Text);

    let key = PrimaryKey::new(vec![CellValue::Text("a".into()), CellValue::Int(1)])
        .with_clustering(vec![CellValue::Text("z".into())]);
    backend.seed_document("ks.t", &key.document_id(), json!({"p1": "a", "p2": 1, "c1": "z"}));
    rows.insert(Row::new(key.clone()).with_cell("v", CellValue::Boolean(true)));

    let results = ResultReconstructor::new(client(&backend), Arc::new(schema), rows.clone(), "hit")
        .execute("ks.t", &SearchRequest::new(FilterExpression::match_all()), ExecuteOptions::default())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key.partition, key.partition);
    assert_eq!(results[0].key.clustering, key.clustering);
    assert_eq!(results[0].cell("v"), Some(&CellValue::Boolean(true)));
}

#[tokio::test]
async fn test_aggregations_fill_synthetic_column() {
    let backend = FakeBackend::new();
    let rows = MemoryRows::new();
    store(&backend, &rows, "tolkien", 1954, 352);
    store(&backend, &rows, "tolkien", 1955, 416);

    let request =
        SearchRequest::new(FilterExpression::match_all()).aggregate("avg_pages", AggregationKind::Avg, "pages");
    let mut results = reconstructor(&backend, &rows)
        .execute(INDEX, &request, ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(results.aggregations().unwrap()["avg_pages"]["value"], 384.0);
    let row = results.next().await.unwrap().unwrap();
    assert_eq!(synthetic(&row)["avg_pages"]["value"], 384.0);
}

#[tokio::test]
async fn test_refresh_before_search() {
    let backend = FakeBackend::new();
    let rows = MemoryRows::new();
    store(&backend, &rows, "tolkien", 1954, 352);

    let options = ExecuteOptions {
        refresh: true,
        scroll: false,
    };
    reconstructor(&backend, &rows)
        .execute(INDEX, &SearchRequest::new(FilterExpression::match_all()), options)
        .await
        .unwrap();

    let paths: Vec<String> = backend.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/library.books/_refresh", "/library.books/_search"]);
}

#[tokio::test]
async fn test_search_of_missing_index_fails() {
    let backend = FakeBackend::new();
    let rows = MemoryRows::new();

    let err = reconstructor(&backend, &rows)
        .execute("missing", &SearchRequest::new(FilterExpression::match_all()), ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
}
