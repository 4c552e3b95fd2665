//! Lifecycle fault taxonomy.

use std::time::Duration;
use thiserror::Error;

use crate::net::listener::ListenerError;

/// A fault that ends a lifecycle run. Reported only through `on_fail`.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The listener could not acquire the address.
    #[error("bind fault: {0}")]
    Bind(#[source] ListenerError),

    /// The accept loop ended abnormally while the service was running.
    #[error("serve fault: {0}")]
    Serve(#[source] ListenerError),

    /// In-flight requests outlived the drain period and were force-closed.
    #[error("drain timed out after {timeout:?} with {remaining} open connection(s)")]
    DrainTimeout { timeout: Duration, remaining: u64 },

    /// Closing the listener failed after shutdown began.
    #[error("close fault: {0}")]
    Close(String),
}

impl LifecycleError {
    /// Short, stable name of the fault class.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Bind(_) => "bind",
            LifecycleError::Serve(_) => "serve",
            LifecycleError::DrainTimeout { .. } => "drain_timeout",
            LifecycleError::Close(_) => "close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn bind_fault_keeps_the_io_cause() {
        let err = LifecycleError::Bind(ListenerError::Bind {
            address: "127.0.0.1:80".into(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        });
        assert_eq!(err.kind(), "bind");
        assert_eq!(
            err.to_string(),
            "bind fault: failed to bind 127.0.0.1:80: address in use"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn drain_timeout_reports_remaining_connections() {
        let err = LifecycleError::DrainTimeout {
            timeout: Duration::from_secs(1),
            remaining: 2,
        };
        assert_eq!(err.kind(), "drain_timeout");
        assert_eq!(
            err.to_string(),
            "drain timed out after 1s with 2 open connection(s)"
        );
    }
}
