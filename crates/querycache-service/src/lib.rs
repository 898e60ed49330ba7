//! A caching proxy for slow query backends.
//!
//! Queries are canonicalized and hashed into a [`query::QueryKey`]. The first request for a key is
//! forwarded to the backend, and once the backend reports a complete result its files are copied
//! into a per-key cache directory in the background. Subsequent requests are answered from the
//! cache without contacting the backend.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod logging;
pub mod materialize;
pub mod query;
pub mod retry;
pub mod service;
pub mod types;
pub mod utils;
