//! Integration tests: HSCAN cursor iteration.

mod common;

use std::collections::BTreeSet;

use bytes::Bytes;
use common::*;
use redust::{ExecMode, HashScan, ScanOptions};

#[tokio::test]
async fn yields_every_entry_exactly_once() {
    let server = MockServer::start().await;
    let engine = server.engine();

    // (entries, page size): includes a full final page arriving with cursor 0
    for (k, p) in [(0, 1), (1, 1), (10, 3), (10, 5), (25, 10), (9, 9), (7, 100)] {
        let key = format!("h_{k}_{p}");
        server.seed_hash(&key, k);

        let mut scan = HashScan::new(&engine, key.clone()).page_size(p);
        let pairs = scan.collect_all().await.unwrap();
        assert_eq!(pairs.len(), k, "k={k} p={p}");

        let fields: BTreeSet<Bytes> = pairs.iter().map(|(f, _)| f.clone()).collect();
        assert_eq!(fields.len(), k, "duplicates for k={k} p={p}");
        for (field, value) in &pairs {
            let suffix = &field[b"field:".len()..];
            assert_eq!(&value[b"value:".len()..], suffix);
        }

        assert!(scan.is_exhausted());
        assert_eq!(scan.advance().await.unwrap(), None);
    }
}

#[tokio::test]
async fn empty_page_with_live_cursor_is_retried() {
    let server = MockServer::with_options(MockOptions {
        empty_first_scan_page: true,
        ..MockOptions::default()
    })
    .await;
    server.seed_hash("h", 4);
    let engine = server.engine();

    let mut scan = HashScan::new(&engine, "h").page_size(2);
    let first = scan.advance().await.unwrap();
    assert!(first.is_some());
    assert_eq!(scan.collect_all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn match_pattern_filters_fields() {
    let server = MockServer::start().await;
    for i in 0..12 {
        server.insert_field("mixed", &format!("a:{i:02}"), "x");
        server.insert_field("mixed", &format!("b:{i:02}"), "y");
    }
    let engine = server.engine();

    // Pages made only of b:* fields come back empty with a live cursor.
    let mut scan = HashScan::new(&engine, "mixed").page_size(5).pattern("a:*");
    let pairs = scan.collect_all().await.unwrap();
    assert_eq!(pairs.len(), 12);
    assert!(pairs.iter().all(|(f, v)| f.starts_with(b"a:") && &v[..] == b"x"));
}

#[tokio::test]
async fn exhausted_scans_compare_equal() {
    let server = MockServer::start().await;
    server.seed_hash("one", 3);
    server.seed_hash("two", 5);
    let engine = server.engine();

    let mut a = HashScan::new(&engine, "one");
    let mut b = HashScan::new(&engine, "two").page_size(2);
    let fresh = HashScan::new(&engine, "one");

    assert!(a.advance().await.unwrap().is_some());
    assert_ne!(a, fresh);

    a.collect_all().await.unwrap();
    assert_ne!(a, b);
    b.collect_all().await.unwrap();
    assert_eq!(a, b);
    assert_ne!(fresh, a);
}

#[tokio::test]
async fn raw_hscan_reply_carries_cursor() {
    let server = MockServer::start().await;
    server.seed_hash("h", 5);
    let engine = server.engine();

    let opts = ScanOptions::default().count(2);
    let first = engine.hscan("h", 0, &opts, ExecMode::Syncron).await.reply().await.unwrap();
    assert_eq!(first.cursor(), Some(2));
    assert_eq!(first.array().unwrap().len(), 4);

    let last = engine.hscan("h", 4, &opts, ExecMode::Asyncron).await.reply().await.unwrap();
    assert_eq!(last.cursor(), Some(0));
    assert_eq!(last.array().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_hash_is_empty() {
    let server = MockServer::start().await;
    let engine = server.engine();
    let mut scan = HashScan::new(&engine, "absent");
    assert_eq!(scan.advance().await.unwrap(), None);
    assert!(scan.is_exhausted());
}
