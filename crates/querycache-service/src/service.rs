//! The query handler tying the cache, the backend and the materializer together.

use std::io;
use std::sync::Arc;

use bytes::Bytes;

use crate::caching::{CacheEntry, CacheStore, Snapshot};
use crate::config::Config;
use crate::dispatch::RemoteDispatcher;
use crate::download::DownloadService;
use crate::error::QueryError;
use crate::materialize::{MaterializationJob, Materializer};
use crate::query::{JsonCanonicalizer, QueryCanonicalizer, QueryKey};
use crate::types::{Phase, ResultDescriptor};

/// Answers queries from the cache, falling back to the backend.
///
/// Requests never wait for result files to be copied, unless inline materialization is
/// configured. Until an entry is finalized, callers get the latest interim status and are
/// expected to poll.
#[derive(Debug)]
pub struct QueryService {
    canonicalizer: Arc<dyn QueryCanonicalizer>,
    store: CacheStore,
    dispatcher: RemoteDispatcher,
    materializer: Materializer,
    max_body_size: usize,
    public_url: String,
    inline_materialization: bool,
}

impl QueryService {
    /// Creates the service. Background work is spawned onto `io_runtime`.
    pub fn create(config: &Config, io_runtime: tokio::runtime::Handle) -> anyhow::Result<Self> {
        Self::with_canonicalizer(config, io_runtime, Arc::new(JsonCanonicalizer))
    }

    pub fn with_canonicalizer(
        config: &Config,
        io_runtime: tokio::runtime::Handle,
        canonicalizer: Arc<dyn QueryCanonicalizer>,
    ) -> anyhow::Result<Self> {
        let downloader = DownloadService::new(config)?;
        let dispatcher = RemoteDispatcher::new(config)?;
        let materializer = Materializer::new(config.workers, downloader, &io_runtime);

        Ok(Self {
            canonicalizer,
            store: CacheStore::new(&config.cache_dir, config.retry),
            dispatcher,
            materializer,
            max_body_size: config.max_body_size,
            public_url: config.public_url.clone(),
            inline_materialization: config.inline_materialization,
        })
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Answers a single query.
    pub async fn handle(&self, body: Bytes) -> Result<ResultDescriptor, QueryError> {
        metric!(counter("query.requests") += 1);

        if body.len() > self.max_body_size {
            return Err(QueryError::SizeExceeded {
                size: body.len(),
                limit: self.max_body_size,
            });
        }

        let canonical = self
            .canonicalizer
            .canonicalize(&body)
            .map_err(QueryError::InvalidQuery)?;
        let key = self.canonicalizer.hash(&canonical);
        let entry = self.store.entry(&key);

        let result = self.lookup(&entry, &body).await;
        match &result {
            Ok(descriptor) => {
                tracing::info!(%key, done = descriptor.done, phase = ?descriptor.phase, "answered query");
            }
            Err(err) => {
                tracing::info!(%key, "query failed: {err}");
                metric!(counter("query.failure") += 1, "kind" => err.kind());
            }
        }
        result
    }

    async fn lookup(&self, entry: &CacheEntry, body: &Bytes) -> Result<ResultDescriptor, QueryError> {
        if let Some(finalized) = entry.load(Snapshot::Finalized).await? {
            metric!(counter("query.cache") += 1, "status" => "hit");
            return Ok(self.publish(entry.key(), finalized));
        }

        let status = match self.load_pending(entry).await {
            Some(pending) => {
                metric!(counter("query.cache") += 1, "status" => "pending");
                pending
            }
            None => {
                metric!(counter("query.cache") += 1, "status" => "miss");
                let status = self.dispatcher.dispatch(body).await?;
                if status.done {
                    entry.ensure_dir().await?;
                    entry.write(Snapshot::Pending, &status).await?;
                }
                status
            }
        };

        let job = MaterializationJob {
            entry: entry.clone(),
            descriptor: status.clone(),
        };

        if self.inline_materialization {
            match self.materializer.materialize(&job).await {
                Ok(_) => {}
                Err(err @ QueryError::CopyError { .. }) => {
                    if let Err(remove_err) = entry.remove().await {
                        tracing::error!(key = %entry.key(), "failed to remove cache entry: {remove_err}");
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }

            if let Some(finalized) = entry.load(Snapshot::Finalized).await? {
                return Ok(self.publish(entry.key(), finalized));
            }
        } else {
            self.materializer.enqueue(job)?;
        }

        Ok(self.interim(entry, status).await)
    }

    /// A pending snapshot that cannot be read is treated as missing, so the backend is asked again.
    async fn load_pending(&self, entry: &CacheEntry) -> Option<ResultDescriptor> {
        match entry.load(Snapshot::Pending).await {
            Ok(pending) => pending,
            Err(err) => {
                log_unreadable(entry, Snapshot::Pending, &err);
                None
            }
        }
    }

    /// The best answer for an entry that is not finalized yet.
    ///
    /// Prefers the interim snapshot over the backend status, and never reports completion.
    async fn interim(&self, entry: &CacheEntry, status: ResultDescriptor) -> ResultDescriptor {
        let interim = match entry.load(Snapshot::Interim).await {
            Ok(interim) => interim,
            Err(err) => {
                log_unreadable(entry, Snapshot::Interim, &err);
                None
            }
        };

        let mut descriptor = match interim {
            Some(mut interim) => {
                interim.phase = Phase::Caching;
                interim
            }
            None => {
                let mut descriptor = status;
                if descriptor.done {
                    descriptor.done = false;
                    descriptor.phase = Phase::Caching;
                }
                descriptor
            }
        };

        if !descriptor.done {
            descriptor.clear_files();
        }
        descriptor
    }

    fn publish(&self, key: &QueryKey, mut descriptor: ResultDescriptor) -> ResultDescriptor {
        descriptor.publish_local_files(&self.public_url, key.as_str());
        descriptor
    }
}

fn log_unreadable(entry: &CacheEntry, snapshot: Snapshot, err: &io::Error) {
    tracing::error!(
        key = %entry.key(),
        "failed to load {}: {err}",
        snapshot.file_name()
    );
}
