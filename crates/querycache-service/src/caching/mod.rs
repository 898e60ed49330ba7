//! # The on-disk cache state store
//!
//! Every query key owns one directory below the configured cache root:
//!
//! ```text
//! <cache_dir>/<key>/result.json          finalized snapshot, written exactly once
//! <cache_dir>/<key>/result-done.json     backend reported completion, files not yet local
//! <cache_dir>/<key>/result-notdone.json  latest status of a query that is still running
//! <cache_dir>/<key>/<file>               copied result files, named by URL basename
//! <cache_dir>/<key>/.tmp*                in-flight writes, never referenced by a snapshot
//! ```
//!
//! The tree is shared by request handlers and background workers without any locking. Every
//! write goes to a temporary in the same directory and is renamed into place, directory creation
//! tolerates concurrent creators, and the finalized snapshot is persisted without clobbering, so
//! the first complete result wins and is never touched again.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::query::QueryKey;
use crate::retry::RetryPolicy;
use crate::types::ResultDescriptor;

/// File name prefix of in-flight writes inside an entry directory.
pub const TEMP_PREFIX: &str = ".tmp";

/// The snapshots an entry can hold.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Snapshot {
    /// The complete result. Immutable once written.
    Finalized,
    /// The backend finished, but the files may not be local yet.
    Pending,
    /// The latest known status of a query that has not finished.
    Interim,
}

impl Snapshot {
    pub fn file_name(self) -> &'static str {
        match self {
            Snapshot::Finalized => "result.json",
            Snapshot::Pending => "result-done.json",
            Snapshot::Interim => "result-notdone.json",
        }
    }
}

/// Where an entry is in its lifecycle, as far as the filesystem tells.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryState {
    NoEntry,
    /// Only interim status is known.
    BackendRunning,
    BackendDonePending,
    /// Pending, with copies in flight.
    Materializing,
    Finalized,
}

/// The cache root. Hands out [`CacheEntry`] handles per key.
#[derive(Clone, Debug)]
pub struct CacheStore {
    root: PathBuf,
    retry: RetryPolicy,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            root: root.into(),
            retry,
        }
    }

    pub fn entry(&self, key: &QueryKey) -> CacheEntry {
        CacheEntry {
            key: key.clone(),
            dir: self.root.join(key.as_str()),
            retry: self.retry,
        }
    }
}

/// The directory of a single query key.
///
/// Creating the handle does not touch the filesystem, the directory is created lazily by
/// [`ensure_dir`](Self::ensure_dir).
#[derive(Clone, Debug)]
pub struct CacheEntry {
    key: QueryKey,
    dir: PathBuf,
    retry: RetryPolicy,
}

impl CacheEntry {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, snapshot: Snapshot) -> PathBuf {
        self.dir.join(snapshot.file_name())
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Creates the entry directory unless it already exists.
    pub async fn ensure_dir(&self) -> io::Result<()> {
        self.retry
            .run("create cache directory", || create_dir(&self.dir))
            .await
    }

    /// Reads a snapshot, `None` if it has not been written.
    pub async fn load(&self, snapshot: Snapshot) -> io::Result<Option<ResultDescriptor>> {
        let path = self.snapshot_path(snapshot);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Atomically replaces a snapshot.
    ///
    /// The finalized snapshot is never replaced: if one exists, the new one is discarded.
    pub async fn write(&self, snapshot: Snapshot, descriptor: &ResultDescriptor) -> io::Result<()> {
        let data = serde_json::to_vec(descriptor)?;
        let path = self.snapshot_path(snapshot);
        let overwrite = snapshot != Snapshot::Finalized;

        self.retry
            .run("persist snapshot", || {
                let dir = self.dir.clone();
                let path = path.clone();
                let data = data.clone();
                async move {
                    tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &data, overwrite))
                        .await
                        .map_err(io::Error::other)?
                }
            })
            .await?;

        tracing::trace!(key = %self.key, "wrote {}", snapshot.file_name());
        Ok(())
    }

    /// Forgets that the backend reported completion, so the next request dispatches again.
    pub async fn clear_pending(&self) -> io::Result<()> {
        remove_if_exists(fs::remove_file(self.snapshot_path(Snapshot::Pending)).await)
    }

    /// Removes the entry directory with everything in it.
    pub async fn remove(&self) -> io::Result<()> {
        let dir = &self.dir;
        self.retry
            .run("remove cache directory", || async move {
                remove_if_exists(fs::remove_dir_all(dir).await)
            })
            .await
    }

    /// Derives the lifecycle state from the snapshots present.
    pub async fn state(&self) -> io::Result<EntryState> {
        if exists(&self.snapshot_path(Snapshot::Finalized)).await? {
            return Ok(EntryState::Finalized);
        }
        if exists(&self.snapshot_path(Snapshot::Pending)).await? {
            return Ok(match self.has_temporaries().await? {
                true => EntryState::Materializing,
                false => EntryState::BackendDonePending,
            });
        }
        if exists(&self.snapshot_path(Snapshot::Interim)).await? {
            return Ok(EntryState::BackendRunning);
        }
        Ok(EntryState::NoEntry)
    }

    async fn has_temporaries(&self) -> io::Result<bool> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

async fn create_dir(dir: &Path) -> io::Result<()> {
    match fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            tracing::error!(
                "{} exists, but is not a directory. Deleting.",
                dir.display()
            );
            remove_if_exists(fs::remove_file(dir).await)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    match fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        // Lost a race against another creator, which is just as good.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8], overwrite: bool) -> io::Result<()> {
    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;

    if overwrite {
        temp.persist(path)?;
        return Ok(());
    }

    match temp.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            tracing::debug!("{} already written, keeping it", path.display());
            Ok(())
        }
        Err(e) => Err(e.error),
    }
}

async fn exists(path: &Path) -> io::Result<bool> {
    fs::try_exists(path).await
}

fn remove_if_exists(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
