use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use querycache_service::service::QueryService;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

mod error;
mod metrics;
mod query;

pub use error::ResponseError;

use query::handle_query as query;

pub async fn healthcheck() -> &'static str {
    querycache_service::metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: Arc<QueryService>) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(middleware::from_fn(metrics::record_metrics))
        .layer(DefaultBodyLimit::max(service.max_body_size()));

    Router::new()
        .route("/query", post(query))
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
