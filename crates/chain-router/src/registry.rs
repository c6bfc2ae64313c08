//! Per-HTTP-method route storage: an exact-match table for fully static
//! routes and a dynamic store bucketed by segment count, each bucket held
//! in priority-descending order.

use std::collections::HashMap;
use std::sync::Arc;

use chain_core::PathInfo;
use parking_lot::RwLock;

use crate::error::{RouterError, RouterResult};
use crate::route::{Handler, Route};

/// Routes with a path this long or longer never appear in the exact map;
/// used only as a fast reject before hashing into it.
const EXACT_LENGTH_BITMAP_SIZE: usize = 2048;

pub type RouteHandle = Arc<RwLock<Route>>;

/// Route storage for one HTTP method.
pub struct MethodRegistry {
    exact: HashMap<String, RouteHandle>,
    exact_lengths: Box<[bool; EXACT_LENGTH_BITMAP_SIZE]>,
    dynamic: Vec<Vec<RouteHandle>>,
    all: Vec<RouteHandle>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            exact_lengths: Box::new([false; EXACT_LENGTH_BITMAP_SIZE]),
            dynamic: Vec::new(),
            all: Vec::new(),
        }
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routes(&self) -> &[RouteHandle] {
        &self.all
    }

    /// Register a route. Fails if it conflicts with an already-registered
    /// route on this method; this is a programmer error the caller should
    /// treat as fatal at startup.
    pub fn add_handle(&mut self, path: PathInfo, handler: Arc<dyn Handler>) -> RouterResult<RouteHandle> {
        for existing in &self.all {
            let existing_path = &existing.read().path;
            if path.conflicts_with(existing_path) {
                return Err(RouterError::RouteConflict {
                    method: String::new(),
                    path: path.original.clone(),
                    other: existing_path.original.clone(),
                });
            }
        }

        let handle = Arc::new(RwLock::new(Route::new(path.clone(), handler)));
        self.all.push(handle.clone());

        if !path.has_parameter && !path.has_wildcard {
            let len = path.original.len();
            if len < EXACT_LENGTH_BITMAP_SIZE {
                self.exact_lengths[len] = true;
            }
            self.exact.insert(path.original.clone(), handle.clone());
        } else {
            let n = path.segment_count();
            if self.dynamic.len() <= n {
                self.dynamic.resize_with(n + 1, Vec::new);
            }
            self.dynamic[n].push(handle.clone());
            self.dynamic[n].sort_by(|a, b| b.read().path.priority.cmp(&a.read().path.priority));

            if path.has_wildcard {
                for bucket in self.dynamic.iter_mut().skip(n + 1) {
                    bucket.push(handle.clone());
                    bucket.sort_by(|a, b| b.read().path.priority.cmp(&a.read().path.priority));
                }
            }
        }

        Ok(handle)
    }

    /// Look up a route for `path`, returning the matched route and its
    /// captured parameters.
    pub fn lookup(&self, path: &str) -> Option<(RouteHandle, Vec<(String, String)>)> {
        let len = path.len();
        if len < EXACT_LENGTH_BITMAP_SIZE && self.exact_lengths[len] {
            if let Some(handle) = self.exact.get(path) {
                return Some((handle.clone(), Vec::new()));
            }
        }
        let segment_count = path.split('/').filter(|s| !s.is_empty()).count();
        if let Some(bucket) = self.dynamic.get(segment_count) {
            for handle in bucket {
                let params = handle.read().path.matches_path(path);
                if let Some(params) = params {
                    return Some((handle.clone(), params));
                }
            }
        }
        None
    }

    /// Case-insensitive lookup used only to compute a redirect target; no
    /// parameters are populated.
    pub fn lookup_case_insensitive(&self, path: &str) -> Option<String> {
        for (k, _) in &self.exact {
            if k.eq_ignore_ascii_case(path) {
                return Some(k.clone());
            }
        }
        let segment_count = path.split('/').filter(|s| !s.is_empty()).count();
        if let Some(bucket) = self.dynamic.get(segment_count) {
            for handle in bucket {
                let p = &handle.read().path;
                if p.matches_path_ci(path, true).is_some() {
                    return Some(p.original.clone());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Handler;
    use async_trait::async_trait;

    struct NoopHandler;
    #[async_trait]
    impl Handler for NoopHandler {
        async fn call(&self, _ctx: &mut crate::context::RequestContext) -> RouterResult<()> {
            Ok(())
        }
    }

    fn h() -> Arc<dyn Handler> {
        Arc::new(NoopHandler)
    }

    #[test]
    fn static_route_hits_exact_map() {
        let mut reg = MethodRegistry::new();
        reg.add_handle(PathInfo::parse("/health").unwrap(), h()).unwrap();
        let (route, params) = reg.lookup("/health").unwrap();
        assert_eq!(route.read().path.original, "/health");
        assert!(params.is_empty());
    }

    #[test]
    fn literal_route_wins_over_param_route() {
        let mut reg = MethodRegistry::new();
        reg.add_handle(PathInfo::parse("/user/:name").unwrap(), h()).unwrap();
        reg.add_handle(PathInfo::parse("/user/admin").unwrap(), h()).unwrap();
        let (route, _) = reg.lookup("/user/admin").unwrap();
        assert_eq!(route.read().path.original, "/user/admin");
    }

    #[test]
    fn wildcard_replicates_into_longer_buckets() {
        let mut reg = MethodRegistry::new();
        reg.add_handle(PathInfo::parse("/src/*filepath").unwrap(), h()).unwrap();
        let (route, params) = reg.lookup("/src/a/b/c.rs").unwrap();
        assert_eq!(route.read().path.original, "/src/*filepath");
        assert_eq!(params[0].1, "/a/b/c.rs");
    }

    #[test]
    fn conflicting_registration_is_rejected() {
        let mut reg = MethodRegistry::new();
        reg.add_handle(PathInfo::parse("/src/*filepath").unwrap(), h()).unwrap();
        assert!(reg.add_handle(PathInfo::parse("/src/*").unwrap(), h()).is_err());
    }

    #[test]
    fn case_insensitive_lookup_finds_fixed_path() {
        let mut reg = MethodRegistry::new();
        reg.add_handle(PathInfo::parse("/path").unwrap(), h()).unwrap();
        assert_eq!(reg.lookup_case_insensitive("/PATH"), Some("/path".to_string()));
    }
}
