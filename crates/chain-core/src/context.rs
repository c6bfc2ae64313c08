//! The per-request [`Context`] scratchpad.
//!
//! This holds the I/O-free slice of the router context: path, captured
//! parameters, the shared per-request key/value store, and the matched
//! route pointer. `chain-router` embeds this alongside the concrete
//! request/response types it carries, the way `mofa-kernel`'s
//! transport-agnostic types are embedded inside `mofa-gateway`'s axum
//! wiring.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::path::PathInfo;

/// Matches the "up to 32" capacity the design gives the parameter slots.
pub const MAX_PARAMS: usize = 32;

/// Shared per-request key/value bag, visible to a [`Context`] and every
/// child produced by [`Context::with_params`].
#[derive(Debug, Default)]
pub struct SharedStore {
    inner: Mutex<HashMap<String, Value>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let guard = self.inner.lock();
        let value = guard.get(key)?.clone();
        serde_json::from_value(value).ok()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.inner.lock().insert(key.to_string(), v);
        } else {
            tracing::warn!(key, "failed to serialize value into shared context store");
        }
    }
}

/// Per-request scratchpad: path, captured route parameters, the shared
/// store, and a pointer to the matched route. Pooled by the router;
/// `reset` clears it for reuse and `with_params` produces a child that
/// inherits the parent's parameters plus newly captured ones.
pub struct Context {
    pub path: String,
    params: Vec<(String, String)>,
    store: Arc<SharedStore>,
    parent: Option<Box<Context>>,
    pub matched_route: Option<Arc<PathInfo>>,
}

impl Context {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
            store: Arc::new(SharedStore::new()),
            parent: None,
            matched_route: None,
        }
    }

    /// Produce a child context that inherits `self`'s parameters plus
    /// `new_params`, sharing the same store. Overflow beyond
    /// [`MAX_PARAMS`] is silently truncated, mirroring the fixed-capacity
    /// slot array this is modeled on.
    pub fn with_params(self, new_params: impl IntoIterator<Item = (String, String)>) -> Context {
        let mut params = self.params.clone();
        for p in new_params {
            if params.len() >= MAX_PARAMS {
                tracing::warn!("context parameter slots exhausted, dropping extra parameters");
                break;
            }
            params.push(p);
        }
        let store = self.store.clone();
        let matched_route = self.matched_route.clone();
        let path = self.path.clone();
        Context {
            path,
            params,
            store,
            parent: Some(Box::new(self)),
            matched_route,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.store.get(key)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: T) {
        self.store.set(key, value);
    }

    /// Release this context's parent chain, walking it recursively so a
    /// whole chain of child contexts is returned at once.
    pub fn into_parent(self) -> Option<Context> {
        self.parent.map(|b| *b)
    }

    /// Reset for pool reuse: drop params/parent/matched route, replace the
    /// shared store with a fresh one, and set a new path.
    pub fn reset(&mut self, path: impl Into<String>) {
        self.path = path.into();
        self.params.clear();
        self.parent = None;
        self.matched_route = None;
        self.store = Arc::new(SharedStore::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_parent_params_and_store() {
        let mut ctx = Context::new("/user/gopher/posts/7");
        ctx.set("auth", "token-123");
        let child = ctx.with_params(vec![("name".to_string(), "gopher".to_string())]);
        assert_eq!(child.param("name"), Some("gopher"));
        assert_eq!(child.get::<String>("auth").as_deref(), Some("token-123"));

        let grandchild = child.with_params(vec![("id".to_string(), "7".to_string())]);
        assert_eq!(grandchild.param("name"), Some("gopher"));
        assert_eq!(grandchild.param("id"), Some("7"));
    }

    #[test]
    fn params_are_capped() {
        let mut ctx = Context::new("/x");
        let extra: Vec<_> = (0..40).map(|i| (format!("k{i}"), i.to_string())).collect();
        ctx = ctx.with_params(extra);
        assert_eq!(ctx.params().len(), MAX_PARAMS);
    }

    #[test]
    fn reset_clears_params_and_parent() {
        let ctx = Context::new("/a");
        let mut child = ctx.with_params(vec![("a".to_string(), "1".to_string())]);
        child.reset("/b");
        assert_eq!(child.path, "/b");
        assert!(child.param("a").is_none());
        assert!(child.into_parent().is_none());
    }
}
