//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, transient error backoff)
//!     → connection.rs (timeouts, tracking, graceful close)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Reading → In flight → Idle → Reading ... → Closed
//! ```
//!
//! # Design Decisions
//! - Timeouts enforced per connection, never globally
//! - Each connection tracked so the drain can report what is left
//! - Listening socket dropped as soon as shutdown is signalled

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionPolicy, ConnectionTracker};
pub use listener::{Listener, ListenerError};
