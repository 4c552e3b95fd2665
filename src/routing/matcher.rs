//! Route pattern matching.
//!
//! # Responsibilities
//! - Match a request path exactly
//! - Match a request path against a subtree (pattern ending in `/`)
//! - Report how specific a pattern is, so the longest one wins
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - No regex: a match is one string comparison

/// Trait for matching request paths against a route pattern.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the path matches this pattern.
    fn matches(&self, path: &str) -> bool;

    /// Length of the pattern. Among matching routes the largest wins.
    fn specificity(&self) -> usize;
}

/// Matches one path exactly.
#[derive(Debug, Clone)]
pub struct ExactMatcher {
    path: String,
}

impl ExactMatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Matcher for ExactMatcher {
    fn matches(&self, path: &str) -> bool {
        path == self.path
    }

    fn specificity(&self) -> usize {
        self.path.len()
    }
}

/// Matches every path under a prefix ending in `/`.
#[derive(Debug, Clone)]
pub struct SubtreeMatcher {
    prefix: String,
}

impl SubtreeMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for SubtreeMatcher {
    fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    fn specificity(&self) -> usize {
        self.prefix.len()
    }
}

/// Compile a pattern into its matcher.
pub fn compile(pattern: &str) -> Box<dyn Matcher> {
    if pattern.ends_with('/') {
        Box::new(SubtreeMatcher::new(pattern))
    } else {
        Box::new(ExactMatcher::new(pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_matcher() {
        let matcher = ExactMatcher::new("/exit");
        assert!(matcher.matches("/exit"));
        assert!(!matcher.matches("/exit/"));
        assert!(!matcher.matches("/exits"));
        assert!(!matcher.matches("/EXIT"));
    }

    #[test]
    fn test_subtree_matcher() {
        let matcher = SubtreeMatcher::new("/info/");
        assert!(matcher.matches("/info/"));
        assert!(matcher.matches("/info/8.8.8.8"));
        assert!(!matcher.matches("/info"));
        assert!(!matcher.matches("/images/x"));
    }

    #[test]
    fn test_root_is_catch_all() {
        let matcher = compile("/");
        assert!(matcher.matches("/"));
        assert!(matcher.matches("/anything/at/all"));
        assert_eq!(matcher.specificity(), 1);
    }

    #[test]
    fn test_compile_picks_kind_by_trailing_slash() {
        assert!(compile("/a/").matches("/a/b"));
        assert!(!compile("/a").matches("/a/b"));
    }
}
