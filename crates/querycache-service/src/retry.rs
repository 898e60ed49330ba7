//! Fixed-delay retries for fallible async operations.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

/// How often and how patiently an operation is retried.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: usize,
    /// Pause between two attempts.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Runs the future produced by `task_gen` until it succeeds or the attempts are used up.
    ///
    /// The error of the last attempt is returned. A policy with zero attempts still runs the
    /// task once.
    pub async fn run<G, F, T, E>(&self, what: &str, mut task_gen: G) -> Result<T, E>
    where
        G: FnMut() -> F,
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut tries = 0;
        loop {
            tries += 1;
            match task_gen().await {
                Ok(value) => break Ok(value),
                Err(err) if tries >= attempts => {
                    tracing::debug!("{what} failed after {tries} attempts: {err}");
                    break Err(err);
                }
                Err(err) => {
                    tracing::debug!("{what} failed (attempt {tries}/{attempts}): {err}");
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
