use querycache_service::caching::EntryState;
use querycache_service::error::QueryError;
use querycache_service::types::{FileRef, Phase};
use reqwest::StatusCode;
use serde_json::json;

use crate::{FileServer, MockBackend, PUBLIC_URL, key_of, query, setup_service};

#[tokio::test]
async fn test_done_on_first_call() {
    let files = FileServer::new();
    let backend = MockBackend::new(json!({
        "done": true,
        "phase": "done",
        "jobs": 1,
        "files": [[files.url("/files/f.root"), "t1"]],
    }));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.inline_materialization = true;
    });

    let body = query("SelectMany(e.Jets())");
    let key = key_of(&body);
    let descriptor = service.handle(body).await.unwrap();

    assert!(descriptor.done);
    assert_eq!(descriptor.phase, Phase::Done);
    assert_eq!(
        descriptor.localfiles,
        vec![FileRef::new(format!("{PUBLIC_URL}/{key}/f.root"), "t1")]
    );

    let entry = service.store().entry(&key);
    assert_eq!(
        std::fs::read_to_string(entry.file_path("f.root")).unwrap(),
        "contents of f.root"
    );
}

#[tokio::test]
async fn test_second_query_is_served_from_cache() {
    let files = FileServer::new();
    let backend = MockBackend::new(json!({
        "done": true,
        "phase": "done",
        "jobs": 1,
        "files": [[files.url("/files/f.root"), "t1"]],
        "dataset": "mc16_13TeV",
    }));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.inline_materialization = true;
    });

    let body = query("SelectMany(e.Jets())");
    let first = service.handle(body.clone()).await.unwrap();
    let second = service.handle(body).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.extra["dataset"], json!("mc16_13TeV"));
    assert_eq!(backend.hits(), 1);
    assert_eq!(files.hits("/files/f.root"), 1);
}

#[tokio::test]
async fn test_backend_still_running() {
    let backend = MockBackend::new(json!({
        "done": false,
        "phase": "running",
        "jobs": 2,
        "files": [],
    }));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.inline_materialization = true;
    });

    let descriptor = service.handle(query("q")).await.unwrap();

    assert!(!descriptor.done);
    assert!(descriptor.localfiles.is_empty());
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn test_failed_copy_removes_entry() {
    let files = FileServer::new();
    let backend = MockBackend::new(json!({
        "done": true,
        "phase": "done",
        "files": [
            [files.url("/files/f1.root"), "t1"],
            [files.url("/broken/f2.root"), "t2"],
        ],
    }));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.inline_materialization = true;
    });

    let body = query("q");
    let entry = service.store().entry(&key_of(&body));

    let err = service.handle(body.clone()).await.unwrap_err();
    assert!(matches!(err, QueryError::CopyError { ref url, .. } if url.ends_with("f2.root")));
    assert!(!entry.dir().exists());

    // nothing was kept, so the next attempt starts over
    let err = service.handle(body).await.unwrap_err();
    assert!(matches!(err, QueryError::CopyError { .. }));
    assert_eq!(backend.hits(), 2);
    assert_eq!(files.hits("/files/f1.root"), 2);
    assert_eq!(entry.state().await.unwrap(), EntryState::NoEntry);
}

#[tokio::test]
async fn test_unparsable_backend_response() {
    let backend = MockBackend::new(json!({}));
    backend.respond_raw(StatusCode::OK, "Traceback (most recent call last):");
    let (service, _cache_dir) = setup_service(&backend, |_| {});

    let err = service.handle(query("q")).await.unwrap_err();

    assert!(matches!(err, QueryError::RemoteError(ref msg) if msg.contains("Traceback")));
    // all three attempts were made
    assert_eq!(backend.hits(), 3);
}

#[tokio::test]
async fn test_existing_files_are_not_copied_again() {
    let files = FileServer::new();
    let backend = MockBackend::new(json!({
        "done": true,
        "phase": "done",
        "files": [[files.url("/files/f.root"), "t1"]],
    }));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.inline_materialization = true;
    });

    let body = query("q");
    let entry = service.store().entry(&key_of(&body));
    service.handle(body.clone()).await.unwrap();

    // Lose the snapshots, but keep the copied file.
    std::fs::remove_file(entry.dir().join("result.json")).unwrap();
    std::fs::remove_file(entry.dir().join("result-done.json")).unwrap();

    let descriptor = service.handle(body).await.unwrap();
    assert!(descriptor.done);
    assert_eq!(backend.hits(), 2);
    assert_eq!(files.hits("/files/f.root"), 1);
    assert_eq!(
        std::fs::read_to_string(entry.file_path("f.root")).unwrap(),
        "contents of f.root"
    );
}

#[tokio::test]
async fn test_identical_queries_share_an_entry() {
    let backend = MockBackend::new(json!({"done": true, "phase": "done", "files": []}));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.inline_materialization = true;
    });

    let a = json!({"query": "q", "options": {"tree": "CollectionTree", "limit": 10}});
    let b = json!({"options": {"limit": 10, "tree": "CollectionTree"}, "query": " q "});
    let a = bytes::Bytes::from(a.to_string());
    let b = bytes::Bytes::from(serde_json::to_string_pretty(&b).unwrap());

    assert_eq!(key_of(&a), key_of(&b));
    assert!(service.handle(a).await.unwrap().done);
    assert!(service.handle(b).await.unwrap().done);
    assert_eq!(backend.hits(), 1);
}
