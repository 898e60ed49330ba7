use std::time::Duration;

use bytes::Bytes;
use querycache_service::config::Config;
use querycache_service::query::{JsonCanonicalizer, QueryCanonicalizer, QueryKey};
use querycache_service::retry::RetryPolicy;
use querycache_service::service::QueryService;
use querycache_service::types::ResultDescriptor;
use querycache_test as test;

pub use test::{FileServer, MockBackend};

pub const PUBLIC_URL: &str = "file:///data/cache";

/// Setup tests and create a test service talking to `backend`.
///
/// This function returns a tuple containing the service to test, and a temporary cache
/// directory. The directory is cleaned up when the [`TempDir`](test::TempDir) instance is dropped.
/// Keep it as guard until the test has finished.
///
/// The `update_config` closure can modify any default configuration before the service is created.
pub fn setup_service(
    backend: &MockBackend,
    update_config: impl FnOnce(&mut Config),
) -> (QueryService, test::TempDir) {
    test::setup();

    let cache_dir = test::tempdir();

    let mut config = Config {
        cache_dir: cache_dir.path().to_owned(),
        backend_url: backend.url(),
        public_url: PUBLIC_URL.into(),
        workers: 2,
        retry: RetryPolicy::new(3, Duration::from_millis(5)),
        dispatch_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    update_config(&mut config);

    let handle = tokio::runtime::Handle::current();
    let service = QueryService::create(&config, handle).unwrap();

    (service, cache_dir)
}

pub fn query(text: &str) -> Bytes {
    Bytes::from(serde_json::json!({ "query": text }).to_string())
}

/// Polls until the service reports a complete result.
pub async fn poll_until_done(service: &QueryService, body: &Bytes) -> ResultDescriptor {
    for _ in 0..300 {
        let descriptor = service.handle(body.clone()).await.unwrap();
        if descriptor.done {
            return descriptor;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("query never completed");
}

pub fn key_of(body: &Bytes) -> QueryKey {
    let canonicalizer = JsonCanonicalizer;
    canonicalizer.hash(&canonicalizer.canonicalize(body).unwrap())
}
