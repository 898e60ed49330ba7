//! Support to copy through an external bulk-transfer program, such as `xrdcp`.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use url::Url;

use super::{DownloadError, Transport};

/// Transport for every scheme the other transports do not handle.
///
/// Runs `<program> <args..> <url> <destination>` and treats a non-zero exit status as failure.
#[derive(Debug)]
pub struct BulkCopyTransport {
    program: String,
    args: Vec<String>,
}

impl BulkCopyTransport {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

#[async_trait]
impl Transport for BulkCopyTransport {
    fn name(&self) -> &'static str {
        "bulk"
    }

    fn can_handle(&self, url: &Url) -> bool {
        !matches!(url.scheme(), "http" | "https" | "file")
    }

    async fn copy(&self, url: &Url, destination: &Path) -> Result<(), DownloadError> {
        tracing::debug!("Copying result file from `{}` with {}", url, self.program);

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(url.as_str())
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(DownloadError::Tool {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(())
    }
}
