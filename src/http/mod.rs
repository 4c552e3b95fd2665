//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection (net::connection)
//!     → server.rs (Axum app, middleware stack)
//!     → request.rs (request ID assigned and propagated)
//!     → routing (longest pattern match)
//!     → handler response, or 404 / 503
//! ```

pub mod request;
pub mod server;

pub use request::{MakeRandomRequestId, X_REQUEST_ID};
pub use server::build_app;
