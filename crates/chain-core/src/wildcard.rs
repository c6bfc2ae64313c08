//! `WildcardStore<T>` (component B of the design): a map keyed by exact
//! strings or trailing-`*` prefixes, used for topic-pattern lookups in the
//! pub/sub adapter registry and for any other "exact or prefix" matching
//! need in the framework.

use crate::error::{ChainError, ChainResult};

#[derive(Debug, Clone)]
struct WildcardEntry<T> {
    prefix: String,
    value: T,
}

/// Exact-match map plus a prefix list for `"foo*"`-style patterns.
///
/// Exact keys always win over wildcard keys. Among wildcard keys, entries
/// are kept sorted by ascending prefix length and scanned front to back, so
/// the first (most general, i.e. shortest) matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct WildcardStore<T> {
    exact: Vec<(String, T)>,
    wildcards: Vec<WildcardEntry<T>>,
}

impl<T> WildcardStore<T> {
    pub fn new() -> Self {
        Self {
            exact: Vec::new(),
            wildcards: Vec::new(),
        }
    }

    /// Insert a pattern. A pattern ending in `*` is a wildcard entry keyed
    /// by everything before the `*`; any other pattern is an exact key.
    ///
    /// Rejects a pattern containing more than one `*`, or one where `*`
    /// appears anywhere but the final position, and rejects duplicate keys.
    pub fn insert(&mut self, pattern: &str, value: T) -> ChainResult<()> {
        let star_count = pattern.matches('*').count();
        if star_count > 1 {
            return Err(ChainError::MultipleWildcards);
        }
        if star_count == 1 {
            if !pattern.ends_with('*') {
                return Err(ChainError::WildcardNotTerminal);
            }
            let prefix = pattern[..pattern.len() - 1].to_string();
            if self.wildcards.iter().any(|e| e.prefix == prefix) {
                return Err(ChainError::DuplicateKey(pattern.to_string()));
            }
            self.wildcards.push(WildcardEntry { prefix, value });
            self.wildcards.sort_by_key(|e| e.prefix.len());
        } else {
            if self.exact.iter().any(|(k, _)| k == pattern) {
                return Err(ChainError::DuplicateKey(pattern.to_string()));
            }
            self.exact.push((pattern.to_string(), value));
        }
        Ok(())
    }

    /// Return the value for the best match of `key`: an exact hit first,
    /// otherwise the first (most general, shortest-prefix) matching
    /// wildcard entry, scanning the ascending-sorted list front to back.
    pub fn matches(&self, key: &str) -> Option<&T> {
        if let Some((_, v)) = self.exact.iter().find(|(k, _)| k == key) {
            return Some(v);
        }
        self.wildcards
            .iter()
            .find(|e| key.starts_with(e.prefix.as_str()))
            .map(|e| &e.value)
    }

    /// Return every value whose pattern matches `key`, exact entries first,
    /// wildcard entries from shortest to longest prefix.
    pub fn matches_all(&self, key: &str) -> Vec<&T> {
        let mut out: Vec<&T> = self
            .exact
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect();
        out.extend(
            self.wildcards
                .iter()
                .filter(|e| key.starts_with(e.prefix.as_str()))
                .map(|e| &e.value),
        );
        out
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_key_wins_over_wildcard() {
        let mut store = WildcardStore::new();
        store.insert("room*", "wild").unwrap();
        store.insert("room:42", "exact").unwrap();
        assert_eq!(store.matches("room:42"), Some(&"exact"));
    }

    #[test]
    fn shortest_wildcard_prefix_wins() {
        let mut store = WildcardStore::new();
        store.insert("room*", "short").unwrap();
        store.insert("room:lobby*", "long").unwrap();
        assert_eq!(store.matches("room:lobby:chat"), Some(&"short"));
        assert_eq!(store.matches("room:other"), Some(&"short"));
    }

    #[test]
    fn rejects_non_terminal_star() {
        let mut store: WildcardStore<&str> = WildcardStore::new();
        assert_eq!(
            store.insert("ro*om", "x").unwrap_err(),
            ChainError::WildcardNotTerminal
        );
    }

    #[test]
    fn rejects_multiple_stars() {
        let mut store: WildcardStore<&str> = WildcardStore::new();
        assert_eq!(
            store.insert("room**", "x").unwrap_err(),
            ChainError::MultipleWildcards
        );
    }

    #[test]
    fn rejects_duplicate_keys() {
        let mut store = WildcardStore::new();
        store.insert("room:1", "a").unwrap();
        assert_eq!(
            store.insert("room:1", "b").unwrap_err(),
            ChainError::DuplicateKey("room:1".to_string())
        );
    }

    #[test]
    fn matches_all_orders_exact_before_wildcards() {
        let mut store = WildcardStore::new();
        store.insert("room*", "wild-short").unwrap();
        store.insert("room:lobby*", "wild-long").unwrap();
        store.insert("room:lobby", "exact").unwrap();
        let all = store.matches_all("room:lobby");
        assert_eq!(all, vec![&"exact", &"wild-short", &"wild-long"]);
    }

    #[test]
    fn no_match_returns_none() {
        let store: WildcardStore<&str> = WildcardStore::new();
        assert_eq!(store.matches("anything"), None);
    }
}
