//! Bounded wait for the serve task to finish after shutdown.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::lifecycle::error::LifecycleError;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::ListenerError;

/// Wait up to `timeout` for `task` to close the listener and every open
/// connection. On expiry the task is aborted, which drops the listening
/// socket and every connection still open.
pub(crate) async fn drain(
    mut task: JoinHandle<Result<(), ListenerError>>,
    timeout: Duration,
    tracker: &ConnectionTracker,
) -> Result<(), LifecycleError> {
    tracing::info!(timeout = ?timeout, open_connections = tracker.active_count(), "Draining");

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!("Drain complete");
            Ok(())
        }
        Ok(Ok(Err(e))) => Err(LifecycleError::Close(e.to_string())),
        Ok(Err(e)) => Err(LifecycleError::Close(format!("serve task ended abnormally: {e}"))),
        Err(_) => {
            let remaining = tracker.active_count();
            tracing::warn!(
                timeout = ?timeout,
                remaining,
                "Drain deadline passed, closing connections"
            );
            task.abort();
            let _ = task.await;
            Err(LifecycleError::DrainTimeout { timeout, remaining })
        }
    }
}
