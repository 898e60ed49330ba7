use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::retry::RetryPolicy;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for querycache.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "querycache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// The external program used for schemes that are not served over HTTP.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct BulkCopyConfig {
    /// Program to spawn, looked up on `PATH`.
    pub program: String,
    /// Arguments passed before the source URL and the destination path.
    pub args: Vec<String>,
}

impl Default for BulkCopyConfig {
    fn default() -> Self {
        Self {
            program: "xrdcp".into(),
            args: vec!["-f".into()],
        }
    }
}

/// See the README for more information on config values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// The backend that executes queries.
    pub backend_url: Url,

    /// Externally visible base URL under which `cache_dir` is published.
    ///
    /// Local file references are rewritten to `<public_url>/<key>/<file>`.
    pub public_url: String,

    /// Root of the cache tree. One directory per query key is created below it.
    pub cache_dir: PathBuf,

    /// Largest accepted query payload in bytes.
    pub max_body_size: usize,

    /// Number of background materialization workers.
    pub workers: usize,

    /// Retry policy for dispatch, copies, renames and snapshot writes.
    pub retry: RetryPolicy,

    /// Timeout of a single request to the backend.
    #[serde(with = "humantime_serde")]
    pub dispatch_timeout: Duration,

    /// Timeout for establishing connections, both to the backend and to file servers.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Copy files within the request instead of handing them to the background workers.
    ///
    /// A failed copy then fails the request and wipes the cache entry of that query.
    pub inline_materialization: bool,

    /// Bulk transfer tool for non-HTTP file URLs.
    pub bulk_copy: BulkCopyConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    if is_docker() {
        // Docker images rely on this service being exposed
        "0.0.0.0:3030".to_owned()
    } else {
        "127.0.0.1:3030".to_owned()
    }
}

/// Default value for the "cache_dir" configuration.
fn default_cache_dir() -> PathBuf {
    if is_docker() {
        PathBuf::from("/cache")
    } else {
        PathBuf::from("cache")
    }
}

/// Default value for the "backend_url" configuration.
fn default_backend_url() -> Url {
    "http://127.0.0.1:8000/".parse().unwrap()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            backend_url: default_backend_url(),
            public_url: "file:///cache".into(),
            cache_dir: default_cache_dir(),
            max_body_size: 1024 * 1000 * 100,
            workers: 32,
            retry: RetryPolicy::default(),
            dispatch_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            inline_materialization: false,
            bulk_copy: BulkCopyConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            )?,
            None => Config::default(),
        };
        config.with_env_overrides(|name| env::var(name).ok())
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// Applies the deployment environment variables on top of the loaded file.
    fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = var("REMOTE_QUERY_URL") {
            self.backend_url = url
                .parse()
                .with_context(|| format!("invalid REMOTE_QUERY_URL `{url}`"))?;
        }
        if let Some(url) = var("LOCAL_FILE_URL") {
            self.public_url = url;
        }
        if let Some(dir) = var("CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        Ok(self)
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
