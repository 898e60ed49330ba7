//! Helpers for testing the web server and service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. The cache creates entry directories lazily, so a dropped
//!    handle silently leaks whatever gets written afterwards.
//!
//!  - Hold [`FileServer`] and [`MockBackend`] until all requests have been made. Dropping them
//!    stops the server.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{self, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Router, middleware};
use reqwest::Url;
use serde_json::Value;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the querycache crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("querycache=trace,querycache_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A file server that counts the requests it receives.
///
/// - `/files/<name>` responds with `contents of <name>`.
/// - `/broken/<name>` responds with `500 Internal Server Error`.
/// - `/delay/<duration>/<name>` waits, then responds like `/files/<name>`.
/// - everything else is `404 Not Found`.
pub struct FileServer {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl FileServer {
    pub fn new() -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |uri: Uri, req: extract::Request, next: middleware::Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        *hits.entry(uri.path().to_owned()).or_default() += 1;
                    }
                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(
                "/files/*name",
                get(|extract::Path(name): extract::Path<String>| async move {
                    format!("contents of {name}")
                }),
            )
            .route(
                "/broken/*name",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .route(
                "/delay/:time/*name",
                get(
                    |extract::Path((time, name)): extract::Path<(String, String)>| async move {
                        let millis = time.trim_end_matches("ms").parse().unwrap_or(0);
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                        format!("contents of {name}")
                    },
                ),
            )
            .layer(middleware::from_fn(hitcounter));

        Self {
            server: Server::with_router(router),
            hits,
        }
    }

    /// Number of requests for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for FileServer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Reply {
    status: StatusCode,
    body: String,
}

#[derive(Debug, Default)]
struct BackendState {
    reply: Mutex<Option<Reply>>,
    requests: Mutex<Vec<Bytes>>,
    delay: Mutex<Duration>,
    hits: AtomicUsize,
}

/// A query backend answering every `POST` with a configurable status document.
///
/// The backend records every request body it receives.
pub struct MockBackend {
    server: Server,
    state: Arc<BackendState>,
}

impl MockBackend {
    pub fn new(status: Value) -> Self {
        let state = Arc::new(BackendState::default());

        async fn respond(State(state): State<Arc<BackendState>>, body: Bytes) -> Response {
            state.hits.fetch_add(1, Ordering::SeqCst);
            state.requests.lock().unwrap().push(body);

            let delay = *state.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let reply = state.reply.lock().unwrap();
            match reply.as_ref() {
                Some(reply) => (
                    reply.status,
                    [("content-type", "application/json")],
                    reply.body.clone(),
                )
                    .into_response(),
                None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            }
        }

        let router = Router::new()
            .route("/", post(respond))
            .route("/*path", post(respond))
            .with_state(state.clone());

        let backend = Self {
            server: Server::with_router(router),
            state,
        };
        backend.respond_with(status);
        backend
    }

    /// Answers subsequent requests with `status`.
    pub fn respond_with(&self, status: Value) {
        self.respond_raw(StatusCode::OK, &status.to_string());
    }

    /// Answers subsequent requests with an arbitrary status code and body.
    pub fn respond_raw(&self, status: StatusCode, body: &str) {
        *self.state.reply.lock().unwrap() = Some(Reply {
            status,
            body: body.to_owned(),
        });
    }

    /// Delays subsequent responses.
    pub fn delay_responses(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// Number of queries the backend received.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// All request bodies received so far.
    pub fn requests(&self) -> Vec<Bytes> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn url(&self) -> Url {
        self.server.url("/")
    }
}
