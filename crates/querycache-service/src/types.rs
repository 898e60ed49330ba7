//! The status records exchanged with the backend and served to clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How far the backend, or the cache, has progressed with a query.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Queued,
    Running,
    /// The backend is done, the files are being copied into the cache.
    Caching,
    Done,
}

/// A reference to a result file: its location and the logical name the query gave it.
///
/// Serialized as a two element array, `["<url>", "<name>"]`.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct FileRef(pub String, pub String);

impl FileRef {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self(url.into(), name.into())
    }

    pub fn url(&self) -> &str {
        &self.0
    }

    pub fn name(&self) -> &str {
        &self.1
    }
}

/// The result of a query as reported by the backend and augmented by the cache.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ResultDescriptor {
    pub done: bool,
    pub phase: Phase,
    /// Remote files produced by the backend.
    #[serde(default)]
    pub files: Vec<FileRef>,
    /// Remote files reachable over HTTP. Preferred over `files` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub httpfiles: Option<Vec<FileRef>>,
    /// Local copies of the remote files.
    ///
    /// Snapshots on disk hold bare file names, served descriptors hold public URLs.
    #[serde(default)]
    pub localfiles: Vec<FileRef>,
    #[serde(default)]
    pub jobs: u64,
    /// Backend fields that the cache passes through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultDescriptor {
    /// Remote files that have to be copied into the cache.
    pub fn remote_files(&self) -> &[FileRef] {
        self.httpfiles.as_deref().unwrap_or(&self.files)
    }

    /// Drops every file reference, remote and local.
    pub fn clear_files(&mut self) {
        self.files.clear();
        self.localfiles.clear();
        if let Some(httpfiles) = self.httpfiles.as_mut() {
            httpfiles.clear();
        }
    }

    /// Turns `localfiles` from bare names into `<base_url>/<key>/<name>`.
    pub fn publish_local_files(&mut self, base_url: &str, key: &str) {
        let base_url = base_url.trim_end_matches('/');
        for file in &mut self.localfiles {
            file.0 = format!("{base_url}/{key}/{}", file.0);
        }
    }
}
