use thiserror::Error;

/// Why a query could not be answered.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The payload is larger than the configured limit.
    #[error("query payload of {size} bytes exceeds the limit of {limit} bytes")]
    SizeExceeded { size: usize, limit: usize },
    /// The payload was rejected by the canonicalizer.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// The backend could not be reached or answered with something unparsable.
    #[error("remote backend failed: {0}")]
    RemoteError(String),
    /// A result file could not be copied into the cache.
    #[error("failed to copy {url}: {reason}")]
    CopyError { url: String, reason: String },
    /// Anything else, usually a filesystem problem in the cache tree.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl QueryError {
    pub(crate) fn copy(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::CopyError {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// A short name for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SizeExceeded { .. } => "size_exceeded",
            Self::InvalidQuery(_) => "invalid_query",
            Self::RemoteError(_) => "remote_error",
            Self::CopyError { .. } => "copy_error",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for QueryError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.into())
    }
}
