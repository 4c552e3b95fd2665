//! Managed HTTP service lifecycle with peer utilities.

pub mod config;
pub mod http;
pub mod ipinfo;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod random;
pub mod reader;
pub mod resilience;
pub mod routing;

pub use config::ServiceConfig;
pub use lifecycle::{LifecycleError, Service, Signal, SignalSource, State, StopHandle};
pub use routing::RouteTable;
