// ============================================================================
// LIKE matching for `Like`/`NotLike` clauses
// ============================================================================
//
// `%` matches any run of characters, `_` exactly one, `\` escapes the next
// character. Simple shapes (`abc`, `abc%`, `%abc`, `%abc%`) are answered
// with plain string operations; everything else goes through a compiled
// regex kept in a small LRU cache.
//
// ============================================================================

use crate::core::{RepoError, Result};
use lru::LruCache;
use regex::{Regex, RegexBuilder};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const REGEX_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

lazy_static::lazy_static! {
    static ref LIKE_REGEX_CACHE: Mutex<LruCache<(String, bool), Arc<Regex>>> =
        Mutex::new(LruCache::new(REGEX_CACHE_CAPACITY));
}

fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    out
}

fn fold(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

/// Answer patterns with at most a leading and a trailing `%` without regex.
fn match_without_regex(text: &str, pattern: &str, case_sensitive: bool) -> Option<bool> {
    if pattern.contains('_') || pattern.contains('\\') {
        return None;
    }

    let leading = pattern.starts_with('%');
    let trailing = pattern.len() > 1 && pattern.ends_with('%');
    let start = usize::from(leading);
    let end = pattern.len() - usize::from(trailing);
    let core = pattern.get(start..end)?;
    if core.contains('%') {
        return None;
    }

    let text = fold(text, case_sensitive);
    let core = fold(core, case_sensitive);
    Some(match (leading, trailing) {
        (false, false) => text == core,
        (false, true) => text.starts_with(&core),
        (true, false) => text.ends_with(&core),
        (true, true) => text.contains(&core),
    })
}

fn compiled(pattern: &str, case_sensitive: bool) -> Result<Arc<Regex>> {
    let key = (pattern.to_string(), case_sensitive);
    if let Some(regex) = LIKE_REGEX_CACHE.lock()?.get(&key) {
        return Ok(Arc::clone(regex));
    }

    let regex = RegexBuilder::new(&like_to_regex(pattern))
        .case_insensitive(!case_sensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| RepoError::Query(format!("Invalid LIKE pattern '{}': {}", pattern, e)))?;
    let regex = Arc::new(regex);

    LIKE_REGEX_CACHE.lock()?.put(key, Arc::clone(&regex));
    Ok(regex)
}

/// Evaluate `text LIKE pattern`.
pub fn matches_like(text: &str, pattern: &str, case_sensitive: bool) -> Result<bool> {
    if let Some(result) = match_without_regex(text, pattern, case_sensitive) {
        return Ok(result);
    }
    Ok(compiled(pattern, case_sensitive)?.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_shapes() {
        assert!(matches_like("member1", "member1", true).unwrap());
        assert!(matches_like("member1", "mem%", true).unwrap());
        assert!(matches_like("member1", "%er1", true).unwrap());
        assert!(matches_like("member1", "%mb%", true).unwrap());
        assert!(!matches_like("member1", "%xyz%", true).unwrap());
        assert!(matches_like("anything", "%", true).unwrap());
    }

    #[test]
    fn test_case_insensitive() {
        assert!(matches_like("MEMBER1", "member%", false).unwrap());
        assert!(!matches_like("MEMBER1", "member%", true).unwrap());
    }

    #[test]
    fn test_regex_shapes() {
        assert!(matches_like("member1", "m_mber_", true).unwrap());
        assert!(matches_like("a.b", "a.b", true).unwrap());
        assert!(!matches_like("axb", "a.b", true).unwrap());
        assert!(matches_like("m1-x-2", "m%x%2", true).unwrap());
        assert!(!matches_like("m1-y-2", "m%x%2", true).unwrap());
    }

    #[test]
    fn test_escaped_wildcards() {
        assert!(matches_like("100%", r"100\%", true).unwrap());
        assert!(!matches_like("1000", r"100\%", true).unwrap());
        assert!(matches_like("a_b", r"a\_b", true).unwrap());
    }
}
