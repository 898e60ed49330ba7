use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{self, rejection::BytesRejection};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Json;
use querycache_service::error::QueryError;
use querycache_service::service::QueryService;
use querycache_service::types::ResultDescriptor;

use super::ResponseError;

/// Answers a query with the current state of its result.
///
/// The body is passed on untouched: the service validates it and forwards it to the backend.
pub async fn handle_query(
    extract::State(service): extract::State<Arc<QueryService>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ResultDescriptor>, ResponseError> {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            let limit = service.max_body_size();
            // Reading stops at the limit, the announced length is all we know.
            let size = headers
                .get(header::CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok()?.parse().ok())
                .unwrap_or(limit.saturating_add(1));
            return Err(QueryError::SizeExceeded { size, limit }.into());
        }
        Err(rejection) => return Err(rejection.into()),
    };

    let descriptor = service.handle(body).await?;
    Ok(Json(descriptor))
}
