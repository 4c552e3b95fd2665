//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (route lookup)
//!     → matcher.rs (exact or subtree match)
//!     → Return: matched Route or NoMatch (404)
//!
//! Route Compilation (at start):
//!     RouteTable (ordered pattern, handler pairs)
//!     → Drop empty and duplicate patterns
//!     → Compile matchers
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at start, immutable at runtime
//! - No regex in hot path
//! - Deterministic: longest pattern wins, ties go to the first registered

pub mod matcher;
pub mod router;

pub use router::{Handler, Request, Route, RouteTable, Router};
