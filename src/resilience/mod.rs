//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Service start:
//!     → timeouts.rs (resolve idle/read/write/drain defaults)
//!     → policy handed to the listener and the drain timer
//!
//! Accept loop:
//!     → transient accept error
//!     → backoff.rs (jittered exponential delay before retrying)
//! ```

pub mod backoff;
pub mod timeouts;

pub use timeouts::{ResolvedTimeouts, Timeouts};
