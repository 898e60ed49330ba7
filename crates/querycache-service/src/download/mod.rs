//! Service which copies result files into the cache, from multiple kinds of locations.
//!
//! Each location kind is served by a [`Transport`]. The [`DownloadService`] asks its transports in
//! order and uses the first one that handles the URL scheme.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::caching::TEMP_PREFIX;
use crate::config::Config;
use crate::retry::RetryPolicy;

mod bulk;
mod filesystem;
mod http;

pub use self::bulk::BulkCopyTransport;
pub use self::filesystem::FilesystemTransport;
pub use self::http::HttpTransport;

/// Why a file could not be copied.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("file not found")]
    NotFound,
    #[error("server responded with {0}")]
    Status(StatusCode),
    #[error("no transport for url scheme `{0}`")]
    Unsupported(String),
    #[error("invalid file location: {0}")]
    InvalidLocation(String),
    #[error("`{program}` exited with {status}: {stderr}")]
    Tool {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A strategy for copying files of some URL schemes to the local disk.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// A short name for metrics and logs.
    fn name(&self) -> &'static str;

    fn can_handle(&self, url: &Url) -> bool;

    /// Copies `url` into the file at `destination`, creating or truncating it.
    ///
    /// In case of any error, the contents of `destination` are garbage.
    async fn copy(&self, url: &Url, destination: &Path) -> Result<(), DownloadError>;
}

/// Derives the local name of a remote file: the last segment of its URL path.
///
/// Returns `None` for URLs that end in a directory, or in `.` or `..`.
pub fn local_file_name(url: &Url) -> Option<&str> {
    let name = url.path_segments()?.next_back()?;
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

/// A service which copies remote files into cache directories.
#[derive(Debug)]
pub struct DownloadService {
    transports: Vec<Box<dyn Transport>>,
    retry: RetryPolicy,
}

impl DownloadService {
    /// Creates the service with the HTTP, filesystem and bulk-copy transports.
    pub fn new(config: &Config) -> reqwest::Result<Arc<Self>> {
        let client = crate::utils::http::create_client(config.connect_timeout, None)?;

        let transports: Vec<Box<dyn Transport>> = vec![
            Box::new(HttpTransport::new(client)),
            Box::new(FilesystemTransport::new()),
            Box::new(BulkCopyTransport::new(
                config.bulk_copy.program.clone(),
                config.bulk_copy.args.clone(),
            )),
        ];

        Ok(Self::with_transports(transports, config.retry))
    }

    pub fn with_transports(transports: Vec<Box<dyn Transport>>, retry: RetryPolicy) -> Arc<Self> {
        Arc::new(Self { transports, retry })
    }

    fn transport_for(&self, url: &Url) -> Option<&dyn Transport> {
        self.transports
            .iter()
            .find(|transport| transport.can_handle(url))
            .map(|transport| transport.as_ref())
    }

    /// Copies `url` to `destination`, which must be a path inside `dir`.
    ///
    /// Every attempt writes a fresh temporary in `dir`, which is renamed onto `destination` only
    /// once the copy is complete. Failed attempts leave nothing behind.
    pub async fn download(
        &self,
        url: &Url,
        dir: &Path,
        destination: &Path,
    ) -> Result<(), DownloadError> {
        let transport = self
            .transport_for(url)
            .ok_or_else(|| DownloadError::Unsupported(url.scheme().to_owned()))?;

        let start = Instant::now();
        let result = self
            .retry
            .run("copy file", || async move {
                let temp = tempfile::Builder::new()
                    .prefix(TEMP_PREFIX)
                    .tempfile_in(dir)?
                    .into_temp_path();

                transport.copy(url, &temp).await?;

                temp.persist(destination).map_err(|e| e.error)?;
                Ok::<_, DownloadError>(())
            })
            .await;

        match &result {
            Ok(()) => {
                tracing::debug!("File `{}` fetched successfully", url);
                metric!(timer("download.duration") = start.elapsed(), "transport" => transport.name());
            }
            Err(err) => {
                tracing::debug!("File `{}` fetching failed: {}", url, err);
                metric!(counter("download.failure") += 1, "transport" => transport.name());
            }
        }

        result
    }
}
