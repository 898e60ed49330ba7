use axum::Json;
use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use querycache_service::error::QueryError;
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
}

impl From<QueryError> for ResponseError {
    fn from(err: QueryError) -> Self {
        let status = match err {
            QueryError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            QueryError::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            QueryError::RemoteError(_) => StatusCode::BAD_GATEWAY,
            QueryError::CopyError { .. } | QueryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            err: err.into(),
        }
    }
}

impl From<anyhow::Error> for ResponseError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
        }
    }
}

impl From<BytesRejection> for ResponseError {
    fn from(rejection: BytesRejection) -> Self {
        Self {
            status: rejection.status(),
            err: anyhow::anyhow!(rejection.body_text()),
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            capture_anyhow(&self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = self.status;
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let detail = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse { detail, causes }
    }
}
