use std::time::Duration;

/// Identifies the cache towards backends and file servers.
pub const USER_AGENT: &str = concat!("querycache/", env!("CARGO_PKG_VERSION"));

/// Creates a [`reqwest::Client`] with the provided timeouts.
///
/// * `connect_timeout` bounds establishing a connection.
/// * `timeout`, when given, bounds the entire request including the body. File downloads leave
///   it unset, since result files can be arbitrarily large.
pub fn create_client(
    connect_timeout: Duration,
    timeout: Option<Duration>,
) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::ClientBuilder::new()
        .gzip(true)
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .pool_idle_timeout(Duration::from_secs(30));

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder.build()
}
