//! Turning query payloads into stable cache keys.
//!
//! The cache never interprets a query. It only needs two guarantees from a
//! [`QueryCanonicalizer`]: identical canonical queries hash to the identical [`QueryKey`], and
//! distinct ones (with overwhelming probability) do not.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a [`QueryKey`].
const KEY_BYTES: usize = 16;

/// The cache partition of a query: 32 lowercase hex characters.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct QueryKey(String);

impl QueryKey {
    /// Derives a key from a digest, keeping its leading bytes.
    pub fn from_digest(digest: &[u8]) -> Self {
        let len = digest.len().min(KEY_BYTES);
        Self(hex::encode(&digest[..len]))
    }

    /// Validates an externally provided key.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == KEY_BYTES * 2
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueryKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The canonical form of a validated query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CanonicalQuery(Vec<u8>);

impl CanonicalQuery {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Reduces query payloads to a hashable canonical form.
pub trait QueryCanonicalizer: Send + Sync + fmt::Debug {
    /// Validates `payload`, returning the reason when it is rejected.
    fn canonicalize(&self, payload: &[u8]) -> Result<CanonicalQuery, String>;

    /// Derives the cache key of a canonical query.
    fn hash(&self, query: &CanonicalQuery) -> QueryKey {
        QueryKey::from_digest(&Sha256::digest(query.as_bytes()))
    }
}

/// The wire format accepted by [`JsonCanonicalizer`].
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct QueryPayload {
    /// The query text, opaque to the cache.
    query: String,
    /// Backend options that change the result. Keys are sorted by the map.
    #[serde(default)]
    options: BTreeMap<String, serde_json::Value>,
}

/// Accepts `{"query": "...", "options": {...}}` JSON documents.
///
/// The canonical form is the compact re-serialization with the query trimmed and every object's
/// keys in sorted order, so formatting and key order do not split the cache.
#[derive(Debug, Default)]
pub struct JsonCanonicalizer;

impl QueryCanonicalizer for JsonCanonicalizer {
    fn canonicalize(&self, payload: &[u8]) -> Result<CanonicalQuery, String> {
        let mut payload: QueryPayload =
            serde_json::from_slice(payload).map_err(|err| err.to_string())?;

        let trimmed = payload.query.trim();
        if trimmed.is_empty() {
            return Err("query must not be empty".into());
        }
        payload.query = trimmed.to_owned();

        // `serde_json::Value` objects are backed by a `BTreeMap`, which keeps nested keys sorted.
        serde_json::to_vec(&payload)
            .map(CanonicalQuery::new)
            .map_err(|err| err.to_string())
    }
}
