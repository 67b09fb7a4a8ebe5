// CacheStore behaviour: overwrite semantics, generation GC, persistence

mod common;

use bytes::Bytes;
use common::*;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use offline_shell_cache::{CacheKey, CacheStore, Generation, HttpResponse, OfflineError};
use std::sync::Arc;

fn key(path: &str) -> CacheKey {
    CacheKey::from_url(&url(&format!("http://app.test/hand{}", path)))
}

#[tokio::test]
async fn test_put_same_response_twice_is_idempotent() {
    let store = CacheStore::new();
    let generation = Generation::from("handtap-v6");
    let response = html("<html>shell</html>");

    store.open(&generation).await.unwrap();
    store.put(&generation, &key("/index.html"), response.clone()).await.unwrap();
    let first = store.get(&generation, &key("/index.html")).await.unwrap();
    store.put(&generation, &key("/index.html"), response.clone()).await.unwrap();
    let second = store.get(&generation, &key("/index.html")).await.unwrap();

    assert_eq!(first, Some(response));
    assert_eq!(first, second);
    assert_eq!(store.stats().total_entries, 1);
}

#[tokio::test]
async fn test_overwrite_replaces_whole_entry() {
    let store = CacheStore::new();
    let generation = Generation::from("handtap-v6");

    store.open(&generation).await.unwrap();
    store
        .put(
            &generation,
            &key("/app.js"),
            HttpResponse::ok("v1").with_header(CONTENT_TYPE, HeaderValue::from_static("text/javascript")),
        )
        .await
        .unwrap();
    store.put(&generation, &key("/app.js"), HttpResponse::ok("v2")).await.unwrap();

    let entry = store.get(&generation, &key("/app.js")).await.unwrap().unwrap();
    assert_eq!(entry.body, Bytes::from("v2"));
    assert!(entry.headers.get(CONTENT_TYPE).is_none());
}

#[tokio::test]
async fn test_no_partial_entry_ever_stored() {
    let store = CacheStore::new();
    let generation = Generation::from("handtap-v6");
    let media = CacheKey::from_url(&url(MEDIA_URL));

    store.open(&generation).await.unwrap();
    store.put(&generation, &media, HttpResponse::ok(media_body(100))).await.unwrap();
    let result = store
        .put(&generation, &media, HttpResponse::new(StatusCode::PARTIAL_CONTENT, media_body(10)))
        .await;
    assert!(matches!(result, Err(OfflineError::StorageError(_))));

    for key in store.keys(&generation).await {
        let entry = store.get(&generation, &key).await.unwrap().unwrap();
        assert_eq!(entry.status, StatusCode::OK);
    }
    assert_eq!(
        store.get(&generation, &media).await.unwrap().unwrap().body.len(),
        100
    );
}

#[tokio::test]
async fn test_delete_generation_is_idempotent() {
    let store = CacheStore::new();
    let old = Generation::from("handtap-v5");
    let current = Generation::from("handtap-v6");

    store.open(&old).await.unwrap();
    store.open(&current).await.unwrap();
    store.put(&old, &key("/a"), HttpResponse::ok("a")).await.unwrap();
    store.put(&current, &key("/a"), HttpResponse::ok("b")).await.unwrap();

    assert!(store.delete_generation(&old).await.unwrap());
    assert!(!store.delete_generation(&old).await.unwrap());
    assert_eq!(store.list_generations().await, vec![current.clone()]);
    assert!(store.get(&old, &key("/a")).await.unwrap().is_none());
    assert!(store.get(&current, &key("/a")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_puts_and_gets() {
    let store = Arc::new(CacheStore::new());
    let generation = Generation::from("handtap-v6");
    store.open(&generation).await.unwrap();
    let mut tasks = Vec::new();

    for i in 0..32 {
        let store = Arc::clone(&store);
        let generation = generation.clone();
        tasks.push(tokio::spawn(async move {
            let k = key(&format!("/asset-{}", i % 4));
            let body = format!("body-{}", i % 4);
            store.put(&generation, &k, HttpResponse::ok(body.clone())).await.unwrap();
            let got = store.get(&generation, &k).await.unwrap().unwrap();
            assert_eq!(got.body, Bytes::from(body));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.keys(&generation).await.len(), 4);
}

#[tokio::test]
async fn test_persistence_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let generation = Generation::from("handtap-v6");

    {
        let store = CacheStore::with_persistence(dir.path()).await.unwrap();
        assert!(store.is_persistent());
        store.open(&generation).await.unwrap();
        store
            .put(&generation, &CacheKey::from_url(&url(MEDIA_URL)), HttpResponse::ok(media_body(4096)))
            .await
            .unwrap();
        store.put(&generation, &key("/index.html"), html("<html>shell</html>")).await.unwrap();
    }

    let reopened = CacheStore::with_persistence(dir.path()).await.unwrap();
    assert_eq!(reopened.list_generations().await, vec![generation.clone()]);

    let media = reopened
        .get(&generation, &CacheKey::from_url(&url(MEDIA_URL)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(media.body, media_body(4096));

    let shell = reopened.get(&generation, &key("/index.html")).await.unwrap().unwrap();
    assert_eq!(shell.content_type(), Some("text/html"));
}

#[tokio::test]
async fn test_persisted_generation_delete() {
    let dir = tempfile::tempdir().unwrap();
    let old = Generation::from("handtap-v5");
    let current = Generation::from("handtap-v6");

    {
        let store = CacheStore::with_persistence(dir.path()).await.unwrap();
        store.open(&old).await.unwrap();
        store.open(&current).await.unwrap();
        store.put(&old, &key("/a"), HttpResponse::ok("a")).await.unwrap();
        store.put(&current, &key("/a"), HttpResponse::ok("b")).await.unwrap();
        store.delete_generation(&old).await.unwrap();
        store.delete(&current, &key("/a")).await.unwrap();
    }

    let reopened = CacheStore::with_persistence(dir.path()).await.unwrap();
    assert_eq!(reopened.list_generations().await, vec![current.clone()]);
    assert!(reopened.keys(&current).await.is_empty());
}

#[tokio::test]
async fn test_corrupt_files_skipped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let generation = Generation::from("handtap-v6");

    {
        let store = CacheStore::with_persistence(dir.path()).await.unwrap();
        store.open(&generation).await.unwrap();
        store.put(&generation, &key("/good"), HttpResponse::ok("good")).await.unwrap();
    }

    let generation_dir = dir.path().join("handtap-v6");
    std::fs::write(generation_dir.join("deadbeefdeadbeef.entry"), b"not bincode").unwrap();
    std::fs::write(generation_dir.join("0000000000000000.tmp"), b"half written").unwrap();

    let reopened = CacheStore::with_persistence(dir.path()).await.unwrap();
    assert_eq!(reopened.keys(&generation).await, vec![key("/good")]);
    assert!(!generation_dir.join("deadbeefdeadbeef.entry").exists());
    assert!(!generation_dir.join("0000000000000000.tmp").exists());
}

#[tokio::test]
async fn test_write_after_gc_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let old = Generation::from("handtap-v5");
    let current = Generation::from("handtap-v6");

    {
        let store = CacheStore::with_persistence(dir.path()).await.unwrap();
        store.open(&old).await.unwrap();
        store.open(&current).await.unwrap();
        store.delete_generation(&old).await.unwrap();

        let late = store.put(&old, &key("/manifest.webmanifest"), HttpResponse::ok("{}")).await;
        assert!(matches!(late, Err(OfflineError::StorageError(_))));
        assert_eq!(store.list_generations().await, vec![current.clone()]);
    }

    assert!(!dir.path().join("handtap-v5").exists());
    let reopened = CacheStore::with_persistence(dir.path()).await.unwrap();
    assert_eq!(reopened.list_generations().await, vec![current]);
}

#[tokio::test]
async fn test_concurrent_puts_same_key_disk_matches_memory() {
    let dir = tempfile::tempdir().unwrap();
    let generation = Generation::from("handtap-v6");
    let store = Arc::new(CacheStore::with_persistence(dir.path()).await.unwrap());
    store.open(&generation).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        let generation = generation.clone();
        tasks.push(tokio::spawn(async move {
            store
                .put(&generation, &key("/app.js"), HttpResponse::ok(format!("build-{}", i)))
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let in_memory = store.get(&generation, &key("/app.js")).await.unwrap().unwrap();
    drop(store);
    let reopened = CacheStore::with_persistence(dir.path()).await.unwrap();
    let on_disk = reopened.get(&generation, &key("/app.js")).await.unwrap().unwrap();
    assert_eq!(in_memory.body, on_disk.body);
}
