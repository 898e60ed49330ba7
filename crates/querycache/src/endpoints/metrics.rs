use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use querycache_service::metric;

/// Records the duration and status code of every request, tagged with the route.
pub async fn record_metrics(path: Option<MatchedPath>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = path
        .as_ref()
        .map_or("unknown", |path| path.as_str())
        .to_owned();

    let response = next.run(request).await;

    metric!(timer("requests.duration") = start.elapsed(), "route" => &route);
    metric!(
        counter("responses.status_code") += 1,
        "status" => response.status().as_str(),
        "route" => &route,
    );
    response
}
