use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use querycache_service::config::Config;
use querycache_service::metric;
use querycache_service::service::QueryService;

use crate::endpoints;

/// Starts the query service and the HTTP server based on loaded config.
///
/// Runs until the server fails or the process receives `SIGTERM` or `SIGINT`. Signals stop the
/// process right away, without waiting for queued materializations.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let io_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("querycache-io")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("querycache-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let service = QueryService::create(&config, io_pool.handle().to_owned())
        .context("failed to create query service")?;
    let socket = config.bind.parse::<SocketAddr>()?;
    let server = axum_server::bind(socket)
        .serve(endpoints::create_app(Arc::new(service)).into_make_service());
    tracing::info!("Starting HTTP server on {}", socket);

    let result = web_pool.block_on(async move {
        tokio::select! {
            result = server => result.context("server failed"),
            signal = shutdown_signal() => {
                let signal = signal.context("failed to listen for signals")?;
                tracing::info!("Received {signal}, shutting down");
                Ok(())
            }
        }
    });

    web_pool.shutdown_background();
    io_pool.shutdown_background();
    tracing::info!("System shutdown complete");

    result
}

#[cfg(unix)]
async fn shutdown_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = terminate.recv() => Ok("SIGTERM"),
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT")
}
