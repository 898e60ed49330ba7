use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use querycache_service::config::Config;
use reqwest::blocking::Client;

/// Checks that a querycache instance on this host can answer queries.
///
/// The server has to answer its healthcheck endpoint, and the cache directory it publishes files
/// from has to be present. Each check prints `OK` or `ERROR`.
pub fn healthcheck(config: Config, addr: Option<SocketAddr>, timeout: u64) -> Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => config.bind.parse().context("invalid bind address")?,
    };

    let client = Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?;

    report("server", check_server(&client, addr))?;
    report("cache", check_cache_dir(&config.cache_dir))?;
    Ok(())
}

fn report(check: &str, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => println!("{check}: OK"),
        Err(_) => println!("{check}: ERROR"),
    }
    result
}

fn check_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{addr}/healthcheck");
    tracing::debug!("Sending request to: {url}");

    let response = client
        .get(&url)
        .send()
        .with_context(|| format!("querycache at {addr} is unreachable"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("querycache at {addr} is unhealthy, status: {status}");
    }
    let body = response.text()?;
    if body.trim() != "ok" {
        bail!("querycache at {addr} answered its healthcheck with `{body}`");
    }
    Ok(())
}

fn check_cache_dir(dir: &Path) -> Result<()> {
    let metadata = std::fs::metadata(dir)
        .with_context(|| format!("cache directory {} is not accessible", dir.display()))?;
    if !metadata.is_dir() {
        bail!("cache directory {} is not a directory", dir.display());
    }
    Ok(())
}
