//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (service.rs):
//!     Idle → Starting → bind → spawn accept loop → on_start → Running
//!
//! Trigger (signals.rs, StopHandle::stop):
//!     SIGINT/SIGTERM/SIGUSR1 → on_interrupt ─┐
//!     stop() ────────────────────────────────┴→ Interrupted → on_exit
//!
//! Drain (shutdown.rs, drain.rs):
//!     Draining → stop accepting → connections finish → Stopped
//!                               → deadline passes   → abort → Failed
//! ```
//!
//! # Design Decisions
//! - Exactly one drain per service: the first trigger wins
//! - Faults are terminal and reported only through on_fail
//! - Shutdown has timeout: forced close after deadline

pub mod drain;
pub mod error;
pub mod hooks;
pub mod service;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use error::LifecycleError;
pub use hooks::Hooks;
pub use service::{Service, StopHandle};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{Signal, SignalSender, SignalSource};
pub use state::State;
