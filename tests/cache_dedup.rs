//! Cache single-flight and isolation properties.

mod common;

use std::sync::Arc;

use common::fixture_reader;
use futures_util::StreamExt;
use serde_json::json;
use weir::{IndexCache, Scan};

fn index_spec() -> serde_json::Value {
    json!({
        "filter": [{"path": "quantity", "min": 18, "max": 20, "index": true}],
        "fields": []
    })
}

async fn drain(scan: Scan) {
    let mut stream = scan.stream().unwrap();
    while let Some(record) = stream.next().await {
        record.unwrap();
    }
}

#[tokio::test]
async fn repeated_scans_reuse_cached_indices() {
    let reader = fixture_reader("shared");
    let cache = Arc::new(IndexCache::default());

    drain(
        Scan::new(vec![reader.clone()], &index_spec())
            .unwrap()
            .with_cache(cache.clone()),
    )
    .await;
    // One offset and one column index per row group.
    assert_eq!(reader.counters.offset(), 2);
    assert_eq!(reader.counters.column(), 2);

    drain(
        Scan::new(vec![reader.clone()], &index_spec())
            .unwrap()
            .with_cache(cache),
    )
    .await;
    assert_eq!(reader.counters.offset(), 2);
    assert_eq!(reader.counters.column(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_scans_share_in_flight_fetches() {
    let reader = fixture_reader("concurrent");
    let cache = Arc::new(IndexCache::default());

    let left = drain(
        Scan::new(vec![reader.clone()], &index_spec())
            .unwrap()
            .with_cache(cache.clone()),
    );
    let right = drain(
        Scan::new(vec![reader.clone()], &index_spec())
            .unwrap()
            .with_cache(cache.clone()),
    );
    futures::join!(left, right);

    // At most one underlying call per (reader, row group, kind, path) key.
    assert_eq!(reader.counters.offset(), 2);
    assert_eq!(reader.counters.column(), 2);
}

#[tokio::test]
async fn reader_ids_isolate_cache_namespaces() {
    let first = fixture_reader("one");
    let second = fixture_reader("two");
    let cache = Arc::new(IndexCache::default());

    drain(
        Scan::new(vec![first.clone()], &index_spec())
            .unwrap()
            .with_cache(cache.clone()),
    )
    .await;
    drain(
        Scan::new(vec![second.clone()], &index_spec())
            .unwrap()
            .with_cache(cache),
    )
    .await;

    // The second reader shares a column layout with the first but must
    // still fetch its own indices.
    assert_eq!(first.counters.offset(), 2);
    assert_eq!(second.counters.offset(), 2);
    assert_eq!(second.counters.column(), 2);
}

#[tokio::test]
async fn concurrent_page_requests_are_deduplicated() {
    let reader = fixture_reader("pages");
    let cache = Arc::new(IndexCache::default());
    let spec = json!({
        "filter": [{"path": "quantity", "value": 25}],
        "fields": []
    });

    let left = drain(
        Scan::new(vec![reader.clone()], &spec)
            .unwrap()
            .with_cache(cache.clone()),
    );
    let right = drain(
        Scan::new(vec![reader.clone()], &spec)
            .unwrap()
            .with_cache(cache.clone()),
    );
    futures::join!(left, right);

    // Page entries are evicted once resolved, so the ceiling is one read
    // per (scan, page) rather than one total; dedup only collapses
    // fetches that overlap in flight. Both scans touch the same three
    // candidate pages.
    assert!(reader.counters.pages() <= 6);
    assert!(reader.counters.pages() >= 3);
}
