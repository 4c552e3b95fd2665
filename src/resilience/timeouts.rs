//! Timeout policy for a service run.
//!
//! # Responsibilities
//! - Hold the caller's idle/read/write/drain overrides
//! - Resolve unset values to the defaults exactly once, at start
//!
//! # Design Decisions
//! - A zero duration is treated the same as an unset one
//! - Resolution is a pure function so it can run after every setter call

use std::time::Duration;

/// Default time an idle keep-alive connection is kept open.
pub const DEFAULT_IDLE: Duration = Duration::from_secs(60);
/// Default time allowed for reading a full request (headers and body).
pub const DEFAULT_READ: Duration = Duration::from_secs(15);
/// Default time allowed for producing and writing a response.
pub const DEFAULT_WRITE: Duration = Duration::from_secs(15);
/// Default grace period for in-flight requests during shutdown.
pub const DEFAULT_DRAIN: Duration = Duration::from_secs(15);

/// Timeout overrides. `None` means "use the default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub idle: Option<Duration>,
    pub read: Option<Duration>,
    pub write: Option<Duration>,
    pub drain: Option<Duration>,
}

/// Timeouts with every default applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimeouts {
    pub idle: Duration,
    pub read: Duration,
    pub write: Duration,
    pub drain: Duration,
}

impl Timeouts {
    /// Apply defaults to every unset (or zero) value.
    pub fn resolve(&self) -> ResolvedTimeouts {
        ResolvedTimeouts {
            idle: or_default(self.idle, DEFAULT_IDLE),
            read: or_default(self.read, DEFAULT_READ),
            write: or_default(self.write, DEFAULT_WRITE),
            drain: or_default(self.drain, DEFAULT_DRAIN),
        }
    }
}

fn or_default(value: Option<Duration>, default: Duration) -> Duration {
    match value {
        Some(d) if !d.is_zero() => d,
        _ => default,
    }
}
