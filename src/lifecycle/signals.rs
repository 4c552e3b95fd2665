//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGINT, SIGTERM and SIGUSR1
//! - Translate deliveries into [`Signal`] values on a channel
//! - Allow an in-process sender to stand in for the OS (embedding, tests)
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are registered synchronously when the source is created, so
//!   a signal sent right after start is not lost
//! - Non-unix targets only listen for ctrl-c

use std::fmt;
use tokio::sync::mpsc;

/// Identity of a shutdown signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// SIGINT / ctrl-c.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGUSR1.
    User1,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Interrupt => "interrupt",
            Signal::Terminate => "terminated",
            Signal::User1 => "user defined signal 1",
        };
        f.write_str(name)
    }
}

/// Stream of shutdown signals consumed by the lifecycle controller.
#[derive(Debug)]
pub struct SignalSource {
    rx: mpsc::UnboundedReceiver<Signal>,
}

/// In-process sender feeding a [`SignalSource`].
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<Signal>,
}

impl SignalSender {
    /// Deliver `signal`. Returns false once the source has been dropped.
    pub fn send(&self, signal: Signal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

impl SignalSource {
    /// Listen for process signals. Must be called from within a Tokio runtime.
    pub fn os() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        install(tx);
        Self { rx }
    }

    /// A source fed only by the returned sender.
    pub fn channel() -> (SignalSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SignalSender { tx }, Self { rx })
    }

    /// Next delivered signal, or `None` once every sender is gone.
    pub(crate) async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

#[cfg(unix)]
fn install(tx: mpsc::UnboundedSender<Signal>) {
    use tokio::signal::unix::{signal, SignalKind};

    let kinds = [
        (SignalKind::interrupt(), Signal::Interrupt),
        (SignalKind::terminate(), Signal::Terminate),
        (SignalKind::user_defined1(), Signal::User1),
    ];

    for (kind, sig) in kinds {
        let mut stream = match signal(kind) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(signal = %sig, error = %e, "Failed to install signal handler");
                continue;
            }
        };

        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = stream.recv() => {
                        if received.is_none() || tx.send(sig).is_err() {
                            break;
                        }
                        tracing::debug!(signal = %sig, "Signal received");
                    }
                    _ = tx.closed() => break,
                }
            }
        });
    }
}

#[cfg(not(unix))]
fn install(tx: mpsc::UnboundedSender<Signal>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = tokio::signal::ctrl_c() => {
                    if let Err(e) = received {
                        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
                        break;
                    }
                    if tx.send(Signal::Interrupt).is_err() {
                        break;
                    }
                }
                _ = tx.closed() => break,
            }
        }
    });
}
