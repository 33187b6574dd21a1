//! Compiles glob-style patterns (`*` wildcard only) into anchored regexes,
//! caching compiled patterns.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::error::{Result, WarpError};

/// Escapes every regex metacharacter in `pattern` except `*`, which becomes
/// `.*`, then anchors the result with `^...$`.
fn glob_to_regex_source(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    for c in pattern.chars() {
        if c == '*' {
            out.push_str(".*");
        } else {
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    out.push('$');
    out
}

/// Caches compiled glob patterns so repeated observer/subscription
/// prefilters don't recompile a regex per call.
#[derive(Default)]
pub struct GlobCache {
    compiled: Mutex<HashMap<String, Arc<Regex>>>,
}

impl GlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, pattern: &str) -> Result<Arc<Regex>> {
        if let Some(regex) = self.compiled.lock().get(pattern) {
            return Ok(regex.clone());
        }
        let regex = Arc::new(
            Regex::new(&glob_to_regex_source(pattern))
                .map_err(|e| WarpError::InvalidGraphName(format!("invalid glob pattern {pattern:?}: {e}")))?,
        );
        self.compiled.lock().insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }

    pub fn matches(&self, pattern: &str, candidate: &str) -> Result<bool> {
        Ok(self.compile(pattern)?.is_match(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_sequence() {
        let cache = GlobCache::new();
        assert!(cache.matches("user:*", "user:alice").unwrap());
        assert!(!cache.matches("user:*", "group:alice").unwrap());
    }

    #[test]
    fn metacharacters_are_escaped() {
        let cache = GlobCache::new();
        assert!(cache.matches("a.b", "a.b").unwrap());
        assert!(!cache.matches("a.b", "axb").unwrap());
    }

    #[test]
    fn exact_match_without_wildcard() {
        let cache = GlobCache::new();
        assert!(cache.matches("node42", "node42").unwrap());
        assert!(!cache.matches("node42", "node4200").unwrap());
    }
}
