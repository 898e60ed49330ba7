use std::env;

use querycache_service::config::{Config, LogFormat};
use querycache_service::logging::init_json_logging;
use sentry::integrations::tracing::EventFilter;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

/// Our crates, which log at the configured level.
const QUERYCACHE_CRATES: &[&str] = &["querycache", "querycache_service"];

/// Dependencies logging every connection at `INFO`.
const NOISY_CRATES: &[&str] = &["hyper", "hyper_util", "reqwest", "axum_server"];

fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "OFF",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => "INFO",
        LevelFilter::DEBUG => "DEBUG",
        LevelFilter::TRACE => "TRACE",
    }
}

/// The `RUST_LOG` directives used when the environment does not set any.
///
/// Verbose levels only apply to our crates, dependencies stay at `INFO`.
fn default_directives(level: LevelFilter) -> String {
    let (crates, crate_level) = match level {
        LevelFilter::OFF => return String::new(),
        LevelFilter::ERROR | LevelFilter::WARN => return level_name(level).to_owned(),
        LevelFilter::INFO => (NOISY_CRATES, LevelFilter::WARN),
        verbose => (QUERYCACHE_CRATES, verbose),
    };

    let mut directives = String::from("INFO");
    for name in crates {
        directives.push_str(&format!(",{name}={}", level_name(crate_level)));
    }
    directives
}

/// Initializes logging for querycache.
///
/// `RUST_LOG` takes precedence over the configured level. With
/// [`enable_backtraces`](querycache_service::config::Logging::enable_backtraces), this also sets
/// `RUST_BACKTRACE` so that errors reported from the handlers carry one.
///
/// # Safety
/// This function uses [`std::env::set_var`] to modify the environment. That function is only safe
/// to call in single-threaded contexts to prevent unsynchronized concurrent access to the environment.
pub unsafe fn init_logging(config: &Config) {
    if config.logging.enable_backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let directives =
        env::var("RUST_LOG").unwrap_or_else(|_| default_directives(config.logging.level));

    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true);
    let fmt_layer = match (config.logging.format, console::user_attended()) {
        (LogFormat::Json, _) => return init_json_logging(&directives, std::io::stdout),
        (LogFormat::Pretty, _) | (LogFormat::Auto, true) => layer.pretty().boxed(),
        (LogFormat::Simplified, _) | (LogFormat::Auto, false) => {
            layer.compact().with_ansi(false).boxed()
        }
    };

    // Failed queries are logged at INFO, only errors of the service itself become events.
    let sentry_layer =
        sentry::integrations::tracing::layer().event_filter(|md| match *md.level() {
            tracing::Level::ERROR => EventFilter::Event | EventFilter::Log,
            tracing::Level::WARN | tracing::Level::INFO => EventFilter::Log,
            tracing::Level::DEBUG | tracing::Level::TRACE => EventFilter::Ignore,
        });

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(EnvFilter::new(&directives)))
        .with(sentry_layer)
        .init();
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::Level::ERROR <= tracing::level_filters::STATIC_MAX_LEVEL
        && tracing::Level::ERROR <= LevelFilter::current()
    {
        tracing::error!("{:?}", error);
    } else {
        eprintln!("{error:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directives(LevelFilter::OFF), "");
        assert_eq!(default_directives(LevelFilter::WARN), "WARN");
        assert_eq!(
            default_directives(LevelFilter::INFO),
            "INFO,hyper=WARN,hyper_util=WARN,reqwest=WARN,axum_server=WARN"
        );
        assert_eq!(
            default_directives(LevelFilter::DEBUG),
            "INFO,querycache=DEBUG,querycache_service=DEBUG"
        );
    }

    #[test]
    fn test_directives_parse() {
        for level in [LevelFilter::INFO, LevelFilter::TRACE] {
            EnvFilter::try_new(default_directives(level)).unwrap();
        }
    }
}
