//! Querycache.
//!
//! Querycache is a caching proxy in front of a slow query backend. It answers repeated queries
//! from a local cache and copies the result files produced by the backend onto local storage, so
//! that clients can read them without going back to the remote.

#![warn(
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: Jemalloc = Jemalloc;

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}

