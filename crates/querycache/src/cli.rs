//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use querycache_service::config::Config;
use querycache_service::metrics;

use crate::healthcheck;
use crate::logging;
use crate::server;

/// Querycache commands.
#[derive(Subcommand)]
enum Command {
    /// Run the web server.
    Run,

    /// Checks whether a running server answers its healthcheck.
    Healthcheck {
        /// Address of the server, defaults to the configured bind address.
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Seconds to wait for a response.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Parser)]
#[command(bin_name = "querycache", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: No other threads have been spawned yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Healthcheck { addr, timeout } => healthcheck::healthcheck(config, addr, timeout)?,
    }

    Ok(())
}
