//! Route matchers — signal-kind, path-glob, magic-string, custom predicate
//!
//! A matcher is a conjunction of zero or more predicates; an empty matcher
//! matches every signal. Glob semantics: `**` matches zero or more path
//! segments, `*` matches exactly one segment, every other segment is a
//! literal. Patterns are anchored at both ends.

use std::sync::Arc;

use crate::types::{Signal, SignalKind};

/// Escape hatch for conditions the declarative predicates cannot express.
pub type CustomPredicate = Arc<dyn Fn(&Signal) -> bool + Send + Sync>;

/// Conjunction of route predicates.
#[derive(Clone, Default)]
pub struct Matcher {
    /// Empty set matches every signal kind.
    pub signal_kinds: Vec<SignalKind>,
    /// Empty means "no path constraint". A signal without a path never
    /// matches a non-empty pattern list.
    pub path_patterns: Vec<String>,
    /// Sentinel prefix the payload content must start with, after leading
    /// whitespace is stripped.
    pub magic_string: Option<String>,
    pub custom: Option<CustomPredicate>,
}

impl Matcher {
    /// Matcher with no predicates: matches all signals.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_kinds(kinds: impl IntoIterator<Item = SignalKind>) -> Self {
        Self {
            signal_kinds: kinds.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.path_patterns.push(pattern.into());
        self
    }

    pub fn with_magic_string(mut self, magic: impl Into<String>) -> Self {
        self.magic_string = Some(magic.into());
        self
    }

    pub fn with_custom<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Signal) -> bool + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(predicate));
        self
    }

    /// Evaluate the conjunction against a signal.
    pub fn matches(&self, signal: &Signal) -> bool {
        if !self.signal_kinds.is_empty() && !self.signal_kinds.contains(&signal.kind()) {
            return false;
        }

        if !self.path_patterns.is_empty() {
            let Some(path) = signal.path() else {
                return false;
            };
            if !self.path_patterns.iter().any(|p| glob_match(p, path)) {
                return false;
            }
        }

        if let Some(magic) = &self.magic_string {
            let Some(content) = signal.content() else {
                return false;
            };
            if !content.trim_start().starts_with(magic.as_str()) {
                return false;
            }
        }

        if let Some(custom) = &self.custom {
            if !custom(signal) {
                return false;
            }
        }

        true
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("signal_kinds", &self.signal_kinds)
            .field("path_patterns", &self.path_patterns)
            .field("magic_string", &self.magic_string)
            .field("custom", &self.custom.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Anchored segment-wise glob match.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path: Vec<&str> = path.trim_matches('/').split('/').collect();
    match_segments(&pattern, &path)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            // Zero or more segments: try consuming none first, then one at a time.
            if match_segments(&pattern[1..], path) {
                return true;
            }
            !path.is_empty() && match_segments(pattern, &path[1..])
        }
        Some(&"*") => !path.is_empty() && match_segments(&pattern[1..], &path[1..]),
        Some(literal) => {
            path.first() == Some(literal) && match_segments(&pattern[1..], &path[1..])
        }
    }
}
