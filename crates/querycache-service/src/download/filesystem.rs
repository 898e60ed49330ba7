//! Support to copy from the local filesystem.
//!
//! Used by backends that write their results to a shared volume, and by tests.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use url::Url;

use super::{DownloadError, Transport};

/// Transport for `file` URLs.
#[derive(Debug, Default)]
pub struct FilesystemTransport {}

impl FilesystemTransport {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl Transport for FilesystemTransport {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn can_handle(&self, url: &Url) -> bool {
        url.scheme() == "file"
    }

    async fn copy(&self, url: &Url, destination: &Path) -> Result<(), DownloadError> {
        let path = url
            .to_file_path()
            .map_err(|_| DownloadError::InvalidLocation(url.to_string()))?;
        tracing::debug!("Fetching result file from {:?}", path);

        let mut file = File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DownloadError::NotFound,
            _ => e.into(),
        })?;
        let mut destination = File::create(destination).await?;
        tokio::io::copy(&mut file, &mut destination).await?;
        Ok(())
    }
}
