//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields
//!     → spans: service (id, address), http_request (request_id, method, uri)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, plain or JSON)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through the request span

pub mod logging;
