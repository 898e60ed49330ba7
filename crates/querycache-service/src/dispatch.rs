//! Forwarding queries to the remote backend.

use std::time::Instant;

use bytes::Bytes;
use reqwest::{Client, header};
use url::Url;

use crate::config::Config;
use crate::error::QueryError;
use crate::retry::RetryPolicy;
use crate::types::ResultDescriptor;

/// How much of an unparsable backend response ends up in the error.
const PREVIEW_LEN: usize = 200;

/// Posts query payloads to the backend and parses its status reply.
#[derive(Debug)]
pub struct RemoteDispatcher {
    client: Client,
    url: Url,
    retry: RetryPolicy,
}

impl RemoteDispatcher {
    pub fn new(config: &Config) -> reqwest::Result<Self> {
        let client = crate::utils::http::create_client(
            config.connect_timeout,
            Some(config.dispatch_timeout),
        )?;
        Ok(Self::with_client(
            client,
            config.backend_url.clone(),
            config.retry,
        ))
    }

    pub fn with_client(client: Client, url: Url, retry: RetryPolicy) -> Self {
        Self { client, url, retry }
    }

    /// Sends the payload, unchanged, and returns the backend's status.
    ///
    /// Every kind of failure is retried. Once the retries are exhausted, the last failure is
    /// reported as [`QueryError::RemoteError`].
    pub async fn dispatch(&self, payload: &Bytes) -> Result<ResultDescriptor, QueryError> {
        let start = Instant::now();
        let result = self
            .retry
            .run("dispatch query", || self.dispatch_once(payload.clone()))
            .await;

        match &result {
            Ok(_) => {
                metric!(timer("dispatch.duration") = start.elapsed());
            }
            Err(err) => {
                tracing::warn!(backend = %self.url, "dispatching query failed: {err}");
                metric!(counter("dispatch.failure") += 1);
            }
        }

        result.map_err(QueryError::RemoteError)
    }

    async fn dispatch_once(&self, payload: Bytes) -> Result<ResultDescriptor, String> {
        let response = self
            .client
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("backend responded with {status}"));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| format!("reading response failed: {err}"))?;

        serde_json::from_slice(&body).map_err(|err| {
            let len = body.len().min(PREVIEW_LEN);
            format!(
                "unparsable response ({err}): {}",
                String::from_utf8_lossy(&body[..len])
            )
        })
    }
}
