//! The router builder and its `ServeHTTP`-equivalent dispatch pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chain_core::{Context, PathInfo};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};

use crate::config::ChainConfig;
use crate::context::RequestContext;
use crate::error::{RouterError, RouterResult};
use crate::registry::MethodRegistry;
use crate::response;
use crate::route::{Handler, MiddlewareEntry, Middleware, Next};

const WILDCARD_METHOD: &str = "*";
const WILDCARD_PATH: &str = "/*";

struct MiddlewareRegistration {
    key: usize,
    method: String,
    path: PathInfo,
    middleware: Arc<dyn Middleware>,
}

struct Hooks {
    error_handler: Option<Arc<dyn Handler>>,
    not_found: Option<Arc<dyn Handler>>,
    method_not_allowed: Option<Arc<dyn Handler>>,
    options: Option<Arc<dyn Handler>>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            error_handler: None,
            not_found: None,
            method_not_allowed: None,
            options: None,
        }
    }
}

/// Builder and request dispatcher. Cheaply cloneable: every clone shares
/// the same registries, so `Group` can hand out scoped builders that still
/// register into one shared table.
#[derive(Clone)]
pub struct Router {
    registries: Arc<RwLock<HashMap<String, MethodRegistry>>>,
    middlewares: Arc<RwLock<Vec<MiddlewareRegistration>>>,
    next_mw_key: Arc<AtomicUsize>,
    context_pool: Arc<Mutex<Vec<Context>>>,
    pub config: Arc<ChainConfig>,
    hooks: Arc<RwLock<Hooks>>,
    prefix: String,
}

fn join_prefix(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    let mut joined = prefix.trim_end_matches('/').to_string();
    if path == "/" {
        return joined;
    }
    joined.push_str(path);
    joined
}

impl Router {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            registries: Arc::new(RwLock::new(HashMap::new())),
            middlewares: Arc::new(RwLock::new(Vec::new())),
            next_mw_key: Arc::new(AtomicUsize::new(0)),
            context_pool: Arc::new(Mutex::new(Vec::new())),
            config: Arc::new(config),
            hooks: Arc::new(RwLock::new(Hooks::default())),
            prefix: String::new(),
        }
    }

    /// A sub-builder whose registrations prepend `prefix`.
    pub fn group(&self, prefix: &str) -> Router {
        let mut clone = self.clone();
        clone.prefix = join_prefix(&self.prefix, prefix);
        clone
    }

    pub fn set_error_handler(&self, handler: Arc<dyn Handler>) {
        self.hooks.write().error_handler = Some(handler);
    }

    pub fn set_not_found_handler(&self, handler: Arc<dyn Handler>) {
        self.hooks.write().not_found = Some(handler);
    }

    pub fn set_method_not_allowed_handler(&self, handler: Arc<dyn Handler>) {
        self.hooks.write().method_not_allowed = Some(handler);
    }

    pub fn set_options_handler(&self, handler: Arc<dyn Handler>) {
        self.hooks.write().options = Some(handler);
    }

    /// Register a route. Panics on registration conflicts and malformed
    /// paths, treating both as programmer error surfaced at startup. See
    /// [`Self::try_handle`] for the fallible form.
    pub fn handle(&self, method: &str, path: &str, handler: Arc<dyn Handler>) {
        self.try_handle(method, path, handler)
            .unwrap_or_else(|e| panic!("chain-router: route registration failed: {e}"));
    }

    pub fn try_handle(&self, method: &str, path: &str, handler: Arc<dyn Handler>) -> RouterResult<()> {
        if method.is_empty() {
            return Err(RouterError::EmptyMethod);
        }
        let full_path = join_prefix(&self.prefix, path);
        if !full_path.starts_with('/') {
            return Err(RouterError::Path(chain_core::ChainError::PathMissingLeadingSlash(full_path)));
        }
        let method = method.to_ascii_uppercase();
        let parsed = PathInfo::parse(&full_path)?;

        let mut registries = self.registries.write();
        let registry = registries.entry(method.clone()).or_insert_with(MethodRegistry::new);
        let route_handle = registry
            .add_handle(parsed.clone(), handler)
            .map_err(|e| match e {
                RouterError::RouteConflict { other, .. } => RouterError::RouteConflict {
                    method: method.clone(),
                    path: full_path.clone(),
                    other,
                },
                other => other,
            })?;
        drop(registries);

        for reg in self.middlewares.read().iter() {
            if (reg.method == WILDCARD_METHOD || reg.method == method) && reg.path.maybe_matches(&parsed) {
                route_handle.write().attach_if_new(reg.key, reg.middleware.clone());
            }
        }
        Ok(())
    }

    /// Register middleware. `method`/`path` of `None` default to `"*"`/`"/*"`,
    /// matching every method and path.
    pub fn use_middleware(&self, method: Option<&str>, path: Option<&str>, middleware: Arc<dyn Middleware>) {
        let method = method.map(|m| m.to_ascii_uppercase()).unwrap_or_else(|| WILDCARD_METHOD.to_string());
        let raw_path = path.map(|p| join_prefix(&self.prefix, p)).unwrap_or_else(|| {
            if self.prefix.is_empty() {
                WILDCARD_PATH.to_string()
            } else {
                join_prefix(&self.prefix, "/*")
            }
        });
        let parsed = PathInfo::parse(&raw_path)
            .unwrap_or_else(|e| panic!("chain-router: invalid middleware path '{raw_path}': {e}"));
        let key = self.next_mw_key.fetch_add(1, Ordering::SeqCst);

        {
            let registries = self.registries.read();
            for (reg_method, registry) in registries.iter() {
                if method != WILDCARD_METHOD && *reg_method != method {
                    continue;
                }
                for route in registry.routes() {
                    let route_path = route.read().path.clone();
                    if parsed.maybe_matches(&route_path) {
                        route.write().attach_if_new(key, middleware.clone());
                    }
                }
            }
        }

        self.middlewares.write().push(MiddlewareRegistration {
            key,
            method,
            path: parsed,
            middleware,
        });
    }

    fn acquire_context(&self, path: &str) -> Context {
        match self.context_pool.lock().pop() {
            Some(mut ctx) => {
                ctx.reset(path);
                ctx
            }
            None => Context::new(path),
        }
    }

    fn release_context(&self, mut ctx: Context) {
        const MAX_POOLED: usize = 256;
        let mut pool = self.context_pool.lock();
        if pool.len() < MAX_POOLED {
            ctx.reset("");
            pool.push(ctx);
        }
    }

    /// The `ServeHTTP` equivalent: look up a route, run middleware then the
    /// handler, and fall through to redirect/404/405/OPTIONS handling on a
    /// miss.
    pub async fn dispatch(&self, mut ctx: RequestContext) -> RequestContext {
        let method = ctx.method().to_string();
        let path = ctx.core.path.clone();

        ctx.core = self.acquire_context(&path);

        let lookup = {
            let registries = self.registries.read();
            registries.get(&method).and_then(|r| r.lookup(&path))
        };

        if let Some((route_handle, params)) = lookup {
            let matched_path = route_handle.read().path.clone();
            if !params.is_empty() {
                let previous = std::mem::replace(&mut ctx.core, Context::new(""));
                ctx.core = previous.with_params(params);
            }
            ctx.core.matched_route = Some(Arc::new(matched_path));

            let route = route_handle.read();
            let middleware_entries: Vec<MiddlewareEntry> = route
                .middleware
                .iter()
                .cloned()
                .map(|m| MiddlewareEntry {
                    path: route.path.clone(),
                    middleware: m,
                })
                .collect();
            let handler = route.handler.clone();
            drop(route);

            let outcome = self.run_guarded(&mut ctx, &middleware_entries, handler.as_ref()).await;
            if let Err(e) = outcome {
                self.handle_error(&mut ctx, e).await;
            }
            ctx.response.finish();
            let released = std::mem::replace(&mut ctx.core, Context::new(""));
            self.release_context(released);
            return ctx;
        }

        self.handle_miss(&mut ctx, &method, &path).await;
        ctx.response.finish();
        let released = std::mem::replace(&mut ctx.core, Context::new(""));
        self.release_context(released);
        ctx
    }

    /// Run the middleware chain + handler with panic recovery installed
    /// around the whole pipeline.
    async fn run_guarded(
        &self,
        ctx: &mut RequestContext,
        chain: &[MiddlewareEntry],
        handler: &dyn Handler,
    ) -> RouterResult<()> {
        let next = Next::new(chain, handler);
        let fut = next.call(ctx);
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(message, "panic recovered in request pipeline");
                Err(RouterError::Panic(message))
            }
        }
    }

    async fn handle_error(&self, ctx: &mut RequestContext, err: RouterError) {
        tracing::debug!(error = %err, "request handler returned an error");

        if let RouterError::BodyReadFailure = err {
            response::bad_request(&mut ctx.response, "request body could not be read");
            return;
        }

        let handler = self.hooks.read().error_handler.clone();
        match handler {
            Some(h) => {
                if let Err(e) = h.call(ctx).await {
                    tracing::error!(error = %e, "configured error handler itself failed");
                    response::internal_server_error(&mut ctx.response);
                }
            }
            None => response::internal_server_error(&mut ctx.response),
        }
    }

    async fn handle_miss(&self, ctx: &mut RequestContext, method: &str, path: &str) {
        if method != "CONNECT" && path != "/" {
            if let Some(target) = self.redirect_target(method, path) {
                response::redirect(&mut ctx.response, method, &target);
                return;
            }
        }

        let known_methods = self.methods_for_path(path);

        if method == "OPTIONS" && self.config.handle_options && !known_methods.is_empty() {
            let allow = allow_header(&known_methods);
            ctx.response.set_header("allow", allow);
            if let Some(h) = self.hooks.read().options.clone() {
                if let Err(e) = h.call(ctx).await {
                    tracing::error!(error = %e, "options handler failed");
                }
            }
            return;
        }

        if !known_methods.is_empty() && self.config.handle_method_not_allowed {
            let allow = allow_header(&known_methods);
            ctx.response.set_header("allow", allow);
            match self.hooks.read().method_not_allowed.clone() {
                Some(h) => {
                    if let Err(e) = h.call(ctx).await {
                        tracing::error!(error = %e, "method-not-allowed handler failed");
                    }
                }
                None => ctx.response.set_status(405),
            };
            return;
        }

        match self.hooks.read().not_found.clone() {
            Some(h) => {
                if let Err(e) = h.call(ctx).await {
                    tracing::error!(error = %e, "not-found handler failed");
                }
            }
            None => response::not_found(&mut ctx.response),
        }
    }

    fn redirect_target(&self, method: &str, path: &str) -> Option<String> {
        let registries = self.registries.read();
        let registry = registries.get(method)?;

        if self.config.redirect_trailing_slash {
            let candidate = if let Some(stripped) = path.strip_suffix('/') {
                stripped.to_string()
            } else {
                format!("{path}/")
            };
            if registry.lookup(&candidate).is_some() {
                return Some(candidate);
            }
        }

        if self.config.redirect_fixed_path {
            let cleaned = clean_path(path);
            if let Some(found) = registry.lookup_case_insensitive(&cleaned) {
                return Some(found);
            }
        }
        None
    }

    fn methods_for_path(&self, path: &str) -> Vec<String> {
        let registries = self.registries.read();
        let mut methods: Vec<String> = registries
            .iter()
            .filter(|(_, registry)| registry.lookup(path).is_some())
            .map(|(m, _)| m.clone())
            .collect();
        methods.sort();
        methods
    }
}

fn allow_header(methods: &[String]) -> String {
    let mut all: Vec<String> = methods.to_vec();
    if !all.iter().any(|m| m == "OPTIONS") {
        all.push("OPTIONS".to_string());
    }
    all.sort();
    all.join(", ")
}

fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

macro_rules! http_method_shortcut {
    ($name:ident, $method:expr) => {
        impl Router {
            pub fn $name(&self, path: &str, handler: Arc<dyn Handler>) {
                self.handle($method, path, handler);
            }
        }
    };
}

http_method_shortcut!(get, "GET");
http_method_shortcut!(head, "HEAD");
http_method_shortcut!(post, "POST");
http_method_shortcut!(put, "PUT");
http_method_shortcut!(patch, "PATCH");
http_method_shortcut!(delete, "DELETE");
http_method_shortcut!(options, "OPTIONS");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_prefix_avoids_double_slash() {
        assert_eq!(join_prefix("/api", "/users"), "/api/users");
        assert_eq!(join_prefix("", "/users"), "/users");
        assert_eq!(join_prefix("/api", "/"), "/api");
    }

    #[test]
    fn allow_header_is_sorted_and_includes_options() {
        let methods = vec!["POST".to_string(), "GET".to_string()];
        assert_eq!(allow_header(&methods), "GET, OPTIONS, POST");
    }

    #[test]
    fn clean_path_collapses_dot_segments() {
        assert_eq!(clean_path("/a/./b/../c"), "/a/c");
    }
}
