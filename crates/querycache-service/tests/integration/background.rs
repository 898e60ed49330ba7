use std::time::Duration;

use querycache_service::caching::{EntryState, Snapshot};
use querycache_service::types::{FileRef, Phase};
use serde_json::json;

use crate::{FileServer, MockBackend, PUBLIC_URL, key_of, poll_until_done, query, setup_service};

#[tokio::test]
async fn test_converges_to_finalized() {
    let files = FileServer::new();
    let backend = MockBackend::new(json!({
        "done": true,
        "phase": "done",
        "jobs": 1,
        "files": [
            [files.url("/delay/50ms/f1.root"), "t1"],
            [files.url("/files/f2.root"), "t2"],
        ],
    }));
    let (service, _cache_dir) = setup_service(&backend, |_| {});

    let body = query("q");
    let key = key_of(&body);

    let first = service.handle(body.clone()).await.unwrap();
    assert!(!first.done);
    assert_eq!(first.phase, Phase::Caching);
    assert!(first.files.is_empty());
    assert!(first.localfiles.is_empty());

    let done = poll_until_done(&service, &body).await;
    assert_eq!(
        done.localfiles,
        vec![
            FileRef::new(format!("{PUBLIC_URL}/{key}/f1.root"), "t1"),
            FileRef::new(format!("{PUBLIC_URL}/{key}/f2.root"), "t2"),
        ]
    );

    // polling reused the pending result instead of asking the backend again
    assert_eq!(backend.hits(), 1);
    assert_eq!(files.hits("/delay/50ms/f1.root"), 1);
}

#[tokio::test]
async fn test_running_query_never_exposes_files() {
    let files = FileServer::new();
    let backend = MockBackend::new(json!({
        "done": false,
        "phase": "running",
        "jobs": 3,
        "files": [[files.url("/files/part1.root"), "t"]],
    }));
    let (service, _cache_dir) = setup_service(&backend, |_| {});

    let body = query("q");
    let entry = service.store().entry(&key_of(&body));

    let first = service.handle(body.clone()).await.unwrap();
    assert!(!first.done);
    assert!(first.files.is_empty());
    assert!(first.localfiles.is_empty());

    // the background job copies what is already there and records an interim snapshot
    for _ in 0..200 {
        if entry.state().await.unwrap() == EntryState::BackendRunning {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(entry.file_path("part1.root").exists());

    let second = service.handle(body).await.unwrap();
    assert!(!second.done);
    assert_eq!(second.phase, Phase::Caching);
    assert_eq!(second.jobs, 3);
    assert!(second.files.is_empty());
    assert!(second.localfiles.is_empty());
    assert_eq!(backend.hits(), 2);
}

#[tokio::test]
async fn test_worker_survives_failed_job() {
    let files = FileServer::new();
    let backend = MockBackend::new(json!({
        "done": true,
        "phase": "done",
        "files": [[files.url("/broken/f.root"), "t"]],
    }));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.workers = 1;
    });

    let body = query("q");
    let entry = service.store().entry(&key_of(&body));

    let first = service.handle(body.clone()).await.unwrap();
    assert!(!first.done);

    // the failed job forgets the backend result
    for _ in 0..200 {
        if entry.state().await.unwrap() == EntryState::NoEntry {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(entry.load(Snapshot::Pending).await.unwrap().is_none());
    assert!(entry.load(Snapshot::Finalized).await.unwrap().is_none());

    backend.respond_with(json!({
        "done": true,
        "phase": "done",
        "files": [[files.url("/files/f.root"), "t"]],
    }));

    let done = poll_until_done(&service, &body).await;
    assert_eq!(done.localfiles.len(), 1);
    assert_eq!(backend.hits(), 2);
}

#[tokio::test]
async fn test_polling_does_not_copy_again() {
    let files = FileServer::new();
    let backend = MockBackend::new(json!({
        "done": true,
        "phase": "done",
        "files": [[files.url("/delay/300ms/big.root"), "t"]],
    }));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.workers = 8;
    });

    let body = query("q");
    for _ in 0..5 {
        let polled = service.handle(body.clone()).await.unwrap();
        assert!(!polled.done);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let done = poll_until_done(&service, &body).await;
    assert_eq!(done.localfiles.len(), 1);
    assert_eq!(backend.hits(), 1);
    assert_eq!(files.hits("/delay/300ms/big.root"), 1);
}

#[tokio::test]
async fn test_concurrent_first_requests() {
    let files = FileServer::new();
    let backend = MockBackend::new(json!({
        "done": true,
        "phase": "done",
        "files": [
            [files.url("/delay/100ms/f1.root"), "t1"],
            [files.url("/files/f2.root"), "t2"],
        ],
    }));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.workers = 8;
    });

    let body = query("q");
    let entry = service.store().entry(&key_of(&body));

    let requests = (0..8).map(|_| service.handle(body.clone()));
    for result in futures::future::join_all(requests).await {
        let descriptor = result.unwrap();
        assert!(!descriptor.done);
        assert!(descriptor.localfiles.is_empty());
    }

    let done = poll_until_done(&service, &body).await;
    assert_eq!(done.localfiles.len(), 2);
    assert_eq!(entry.state().await.unwrap(), EntryState::Finalized);

    // every request may have asked the backend, but each file was copied once
    assert!((1..=8).contains(&backend.hits()));
    assert_eq!(files.hits("/delay/100ms/f1.root"), 1);
    assert_eq!(files.hits("/files/f2.root"), 1);

    let mut names: Vec<_> = std::fs::read_dir(entry.dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(
        names,
        ["f1.root", "f2.root", "result-done.json", "result.json"]
    );
}
