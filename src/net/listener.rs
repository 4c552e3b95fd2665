//! TCP listener and accept loop.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections until shutdown
//! - Retry transient accept errors with backoff
//! - Close the listening socket, then wait for open connections

use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::connection::{serve_connection, ConnectionPolicy, ConnectionTracker};
use crate::resilience::backoff::calculate_backoff;

const ACCEPT_BACKOFF_BASE_MS: u64 = 5;
const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// Failed to accept a connection (non-transient).
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),
}

/// A bound TCP listener carrying the per-connection policy.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    local_addr: SocketAddr,
    policy: ConnectionPolicy,
}

impl Listener {
    /// Bind to `address`. A leading `:port` binds every interface.
    pub async fn bind(address: &str, policy: ConnectionPolicy) -> Result<Self, ListenerError> {
        let normalized = normalize_address(address);
        let bind_error = |source| ListenerError::Bind {
            address: address.to_string(),
            source,
        };

        let inner = TcpListener::bind(normalized.as_str()).await.map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(
            address = %local_addr,
            idle = ?policy.idle,
            read = ?policy.read,
            write = ?policy.write,
            "Listener bound"
        );

        Ok(Self {
            inner,
            local_addr,
            policy,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` fires, then close the socket and
    /// wait for every open connection to finish.
    ///
    /// Returning early with an error drops the connection set, which aborts
    /// every connection task.
    pub async fn serve(
        self,
        app: axum::Router,
        mut shutdown: ShutdownSignal,
        tracker: ConnectionTracker,
    ) -> Result<(), ListenerError> {
        let Listener {
            inner,
            local_addr,
            policy,
        } = self;
        let mut connections = JoinSet::new();
        let mut failures = 0u32;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                accepted = inner.accept() => accepted,
            };

            while connections.try_join_next().is_some() {}

            match accepted {
                Ok((stream, peer)) => {
                    failures = 0;
                    let guard = tracker.track();
                    tracing::debug!(
                        connection_id = %guard.id(),
                        peer_addr = %peer,
                        active = tracker.active_count(),
                        "Connection accepted"
                    );
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        app.clone(),
                        policy.clone(),
                        guard,
                        shutdown.clone(),
                    ));
                }
                Err(e) if is_transient(&e) => {
                    failures = failures.saturating_add(1);
                    let delay =
                        calculate_backoff(failures, ACCEPT_BACKOFF_BASE_MS, ACCEPT_BACKOFF_MAX_MS);
                    tracing::warn!(error = %e, delay = ?delay, "Transient accept error");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(address = %local_addr, error = %e, "Accept loop failed");
                    return Err(ListenerError::Accept(e));
                }
            }
        }

        drop(inner);
        tracing::info!(
            address = %local_addr,
            open_connections = connections.len(),
            "Listener closed, draining connections"
        );

        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!(error = %e, "Connection task panicked");
                }
            }
        }

        tracing::info!(address = %local_addr, "All connections closed");
        Ok(())
    }
}

/// `:8000` → `0.0.0.0:8000`; anything else is passed through.
fn normalize_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

fn is_transient(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }
    // EMFILE / ENFILE: out of descriptors, recoverable once connections close.
    matches!(e.raw_os_error(), Some(23) | Some(24))
}
