//! Request identification.
//!
//! # Responsibilities
//! - Generate a request ID when the client did not send one
//! - Read the ID back for tracing spans and handlers
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - IDs are random alphanumeric strings, fixed length

use axum::http::{HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};

use crate::random;

/// Header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Length of generated request IDs.
pub const REQUEST_ID_LEN: usize = 16;

/// Generates alphanumeric request IDs from the OS CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRandomRequestId;

impl MakeRequestId for MakeRandomRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        match random::alphanum(REQUEST_ID_LEN) {
            Ok(id) => HeaderValue::from_str(&id).ok().map(RequestId::new),
            Err(e) => {
                tracing::warn!(error = %e, "Could not generate request ID");
                None
            }
        }
    }
}

/// The request's ID, or `""` when it has none.
pub fn request_id<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
