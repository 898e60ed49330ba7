//! Copying result files into the cache and finalizing entries.
//!
//! Jobs are queued on an unbounded channel and picked up by a fixed pool of workers running on
//! the io runtime. Each worker is supervised: if it panics, the job it was working on is dropped
//! and a fresh worker takes its place. Workers stop once the [`Materializer`] is dropped and the
//! queue is drained.
//!
//! At most one job per key is queued or running at any time. Requests polling a key whose files
//! are still being copied do not queue another copy of the same files.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use tokio::fs;
use tokio::sync::{Mutex, mpsc};
use url::Url;

use crate::caching::{CacheEntry, Snapshot};
use crate::download::{DownloadService, local_file_name};
use crate::error::QueryError;
use crate::query::QueryKey;
use crate::types::{FileRef, ResultDescriptor};

type JobReceiver = Arc<Mutex<mpsc::UnboundedReceiver<MaterializationJob>>>;

/// The files of one backend result, to be copied into one cache entry.
#[derive(Clone, Debug)]
pub struct MaterializationJob {
    pub entry: CacheEntry,
    /// Owned copy of the backend status. The handler keeps its own.
    pub descriptor: ResultDescriptor,
}

/// Keys with a job that is queued or running.
#[derive(Clone, Debug, Default)]
struct InFlight(Arc<std::sync::Mutex<HashSet<QueryKey>>>);

impl InFlight {
    /// Marks `key` as in flight, `false` if it already was.
    fn insert(&self, key: &QueryKey) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone())
    }

    fn remove(&self, key: &QueryKey) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Releases a key once its job is finished, even if the worker panicked.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    key: &'a QueryKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(self.key);
    }
}

/// Owns the job queue and the workers draining it.
#[derive(Debug)]
pub struct Materializer {
    sender: mpsc::UnboundedSender<MaterializationJob>,
    downloader: Arc<DownloadService>,
    in_flight: InFlight,
}

impl Materializer {
    /// Spawns `workers` supervised workers onto `runtime`.
    pub fn new(
        workers: usize,
        downloader: Arc<DownloadService>,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver: JobReceiver = Arc::new(Mutex::new(receiver));
        let in_flight = InFlight::default();

        for id in 0..workers.max(1) {
            runtime.spawn(supervise(
                id,
                receiver.clone(),
                downloader.clone(),
                in_flight.clone(),
            ));
        }

        Self {
            sender,
            downloader,
            in_flight,
        }
    }

    /// Queues a job for the background workers.
    ///
    /// Returns `false` without queueing anything if a job for the same key is still pending.
    pub fn enqueue(&self, job: MaterializationJob) -> Result<bool, QueryError> {
        let key = job.entry.key().clone();
        if !self.in_flight.insert(&key) {
            tracing::trace!(%key, "materialization already in flight");
            metric!(counter("materialize.deduplicated") += 1);
            return Ok(false);
        }

        tracing::trace!(%key, "queueing materialization");
        if self.sender.send(job).is_err() {
            self.in_flight.remove(&key);
            return Err(anyhow::anyhow!("materialization workers are gone").into());
        }
        Ok(true)
    }

    /// Runs a job on the calling task and returns the descriptor it persisted.
    pub async fn materialize(&self, job: &MaterializationJob) -> Result<ResultDescriptor, QueryError> {
        process(&self.downloader, job).await
    }
}

async fn supervise(
    id: usize,
    receiver: JobReceiver,
    downloader: Arc<DownloadService>,
    in_flight: InFlight,
) {
    loop {
        let worker = tokio::spawn(work(
            receiver.clone(),
            downloader.clone(),
            in_flight.clone(),
        ));
        match worker.await {
            // The queue is closed.
            Ok(()) => break,
            Err(err) if err.is_panic() => {
                tracing::error!("materialization worker {id} panicked, restarting it");
                metric!(counter("materialize.worker_restart") += 1);
            }
            Err(_) => break,
        }
    }
    tracing::debug!("materialization worker {id} stopped");
}

async fn work(receiver: JobReceiver, downloader: Arc<DownloadService>, in_flight: InFlight) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            return;
        };
        let _guard = InFlightGuard {
            in_flight: &in_flight,
            key: job.entry.key(),
        };

        let start = Instant::now();
        match process(&downloader, &job).await {
            Ok(descriptor) => {
                tracing::debug!(
                    key = %job.entry.key(),
                    done = descriptor.done,
                    "materialized {} files",
                    descriptor.localfiles.len()
                );
                metric!(timer("materialize.duration") = start.elapsed());
            }
            Err(err) => {
                tracing::error!(key = %job.entry.key(), "materialization failed: {err}");
                metric!(counter("materialize.failure") += 1, "kind" => err.kind());

                // Forget the backend result, so that the next request dispatches again.
                if job.descriptor.done
                    && let Err(err) = job.entry.clear_pending().await
                {
                    tracing::error!(key = %job.entry.key(), "failed to clear pending result: {err}");
                }
            }
        }
    }
}

/// Copies every remote file of the job that is not local yet, then persists the snapshot.
///
/// Complete results go to the finalized snapshot, others refresh the interim one.
async fn process(
    downloader: &DownloadService,
    job: &MaterializationJob,
) -> Result<ResultDescriptor, QueryError> {
    let entry = &job.entry;
    entry.ensure_dir().await?;

    let mut localfiles = Vec::new();
    let mut sources = HashMap::new();
    for file in job.descriptor.remote_files() {
        let url = Url::parse(file.url()).map_err(|err| QueryError::copy(file.url(), err))?;
        let name = local_file_name(&url)
            .ok_or_else(|| QueryError::copy(file.url(), "url does not name a file"))?;

        // Both would land in the same local file.
        if let Some(other) = sources.insert(name.to_owned(), file.url())
            && other != file.url()
        {
            return Err(QueryError::copy(
                file.url(),
                format!("local name `{name}` is already taken by {other}"),
            ));
        }

        let destination = entry.file_path(name);
        if fs::try_exists(&destination).await? {
            tracing::trace!(key = %entry.key(), "{name} is already cached");
        } else {
            downloader
                .download(&url, entry.dir(), &destination)
                .await
                .map_err(|err| QueryError::copy(file.url(), err))?;
        }

        localfiles.push(FileRef::new(name, file.name()));
    }

    let mut descriptor = job.descriptor.clone();
    descriptor.localfiles = localfiles;

    let snapshot = match descriptor.done {
        true => Snapshot::Finalized,
        false => Snapshot::Interim,
    };
    entry.write(snapshot, &descriptor).await?;

    Ok(descriptor)
}
