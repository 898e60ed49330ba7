//! Support to download from HTTP servers.

use std::path::Path;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::{DownloadError, Transport};

/// Transport for `http` and `https` URLs.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    async fn copy(&self, url: &Url, destination: &Path) -> Result<(), DownloadError> {
        tracing::debug!("Fetching result file from `{}`", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DownloadError::NotFound);
        }
        if !status.is_success() {
            return Err(DownloadError::Status(status));
        }

        let mut file = File::create(destination).await?;
        let mut stream = std::pin::pin!(response.bytes_stream());
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
