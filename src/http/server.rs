//! HTTP application assembly.
//!
//! # Responsibilities
//! - Create the Axum Router that dispatches to the route table
//! - Wire up middleware (request ID, tracing, handler timeout)
//! - Answer unmatched paths with 404

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::http::request::{request_id, MakeRandomRequestId};
use crate::routing::{RouteTable, Router as RouteRouter};

/// Build the application served on every connection.
///
/// A handler that has not produced its response within `write_timeout` is
/// answered with `503 Service Unavailable`.
pub fn build_app(routes: RouteTable, write_timeout: Duration) -> Router {
    let routes = Arc::new(RouteRouter::from_table(routes));

    Router::new()
        .fallback(dispatch)
        .with_state(routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRandomRequestId))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id(request),
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::SERVICE_UNAVAILABLE,
                    write_timeout,
                )),
        )
}

/// Look up the route for the request path and run its handler.
async fn dispatch(State(routes): State<Arc<RouteRouter>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    match routes.resolve(&path) {
        Some(route) => {
            tracing::debug!(pattern = %route.pattern, path = %path, "Route matched");
            route.handler.call(request).await
        }
        None => {
            tracing::debug!(path = %path, "No route matched");
            (StatusCode::NOT_FOUND, "404 page not found\n").into_response()
        }
    }
}
