use querycache_service::error::QueryError;
use serde_json::json;

use crate::{MockBackend, query, setup_service};

#[tokio::test]
async fn test_oversized_payload() {
    let backend = MockBackend::new(json!({"done": false, "phase": "queued"}));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        config.max_body_size = 16;
    });

    let err = service
        .handle(query("a query that is way too long"))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::SizeExceeded { limit: 16, .. }));
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_invalid_payload() {
    let backend = MockBackend::new(json!({"done": false, "phase": "queued"}));
    let (service, _cache_dir) = setup_service(&backend, |_| {});

    for body in [
        &b"not json"[..],
        &br#"{"query": "   "}"#[..],
        &br#"{"ast": "q"}"#[..],
    ] {
        let err = service
            .handle(bytes::Bytes::copy_from_slice(body))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
    }
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_backend_unreachable() {
    let backend = MockBackend::new(json!({}));
    let (service, _cache_dir) = setup_service(&backend, |config| {
        // nothing listens on the discard port
        config.backend_url = "http://127.0.0.1:9/".parse().unwrap();
    });

    let err = service.handle(query("q")).await.unwrap_err();
    assert!(matches!(err, QueryError::RemoteError(_)));
}
