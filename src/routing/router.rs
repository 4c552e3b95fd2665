//! Route table and lookup.
//!
//! # Responsibilities
//! - Collect (pattern, handler) pairs in registration order
//! - Compile them into an immutable lookup structure
//! - Return the matched route or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan over routes (acceptable for typical route counts)
//! - Longest pattern wins, ties go to the first registered
//! - Explicit NoMatch rather than silent default

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::routing::matcher::{compile, Matcher};

/// Request type seen by handlers.
pub type Request = axum::extract::Request;

/// Type-erased async request handler.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>);

impl Handler {
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse + 'static,
    {
        Self(Arc::new(move |req: Request| {
            f(req).map(IntoResponse::into_response).boxed()
        }))
    }

    pub fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        (self.0)(req)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

/// Ordered (pattern, handler) pairs, as supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<(String, Handler)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`RouteTable::add`].
    pub fn route<F, Fut, R>(mut self, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse + 'static,
    {
        self.add(pattern, handler);
        self
    }

    /// Append a route. Duplicate patterns are kept; the first one wins.
    pub fn add<F, Fut, R>(&mut self, pattern: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse + 'static,
    {
        self.entries.push((pattern.into(), Handler::new(handler)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Patterns in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(pattern, _)| pattern.as_str())
    }
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub pattern: String,
    pub handler: Handler,
    matcher: Box<dyn Matcher>,
}

/// Immutable route lookup built from a [`RouteTable`].
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Compile the table. Empty patterns and later duplicates are dropped.
    pub fn from_table(table: RouteTable) -> Self {
        let mut routes: Vec<Route> = Vec::with_capacity(table.len());

        for (pattern, handler) in table.entries {
            if pattern.is_empty() {
                tracing::warn!("Ignoring route with empty pattern");
                continue;
            }
            if routes.iter().any(|r| r.pattern == pattern) {
                tracing::warn!(pattern = %pattern, "Duplicate route pattern, keeping the first");
                continue;
            }
            routes.push(Route {
                matcher: compile(&pattern),
                pattern,
                handler,
            });
        }

        tracing::debug!(routes = routes.len(), "Route table compiled");
        Self { routes }
    }

    /// Find the most specific route matching `path`.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        let mut best: Option<&Route> = None;
        for route in self.routes.iter().filter(|r| r.matcher.matches(path)) {
            match best {
                Some(b) if route.matcher.specificity() <= b.matcher.specificity() => {}
                _ => best = Some(route),
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
