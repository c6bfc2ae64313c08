//! Route and middleware registration types.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chain_core::PathInfo;

use crate::context::RequestContext;
use crate::error::RouterResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A registered route handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext) -> RouterResult<()>;
}

/// Blanket impl so a plain async closure can be registered directly,
/// so handlers and middleware can be registered as `Arc<dyn Trait>` call
/// sites without forcing every caller through a closure.
#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(&mut RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = RouterResult<()>> + Send,
{
    async fn call(&self, ctx: &mut RequestContext) -> RouterResult<()> {
        (self)(ctx).await
    }
}

/// A registered middleware. `next` advances the chain; calling it more than
/// once returns the remembered outcome of the first call instead of
/// rerunning downstream.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext, next: Next<'_>) -> RouterResult<()>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(&mut RequestContext, Next<'_>) -> Fut + Send + Sync,
    Fut: Future<Output = RouterResult<()>> + Send,
{
    async fn call(&self, ctx: &mut RequestContext, next: Next<'_>) -> RouterResult<()> {
        (self)(ctx, next).await
    }
}

pub struct MiddlewareEntry {
    pub path: PathInfo,
    pub middleware: Arc<dyn Middleware>,
}

/// A fully registered route: its parsed path, handler, and the ordered
/// middleware list attached at registration time (built incrementally as
/// `addMiddleware`/`addHandle` interleave).
pub struct Route {
    pub path: PathInfo,
    pub handler: Arc<dyn Handler>,
    pub middleware: Vec<Arc<dyn Middleware>>,
    attached: std::collections::HashSet<usize>,
}

impl Route {
    pub fn new(path: PathInfo, handler: Arc<dyn Handler>) -> Self {
        Self {
            path,
            handler,
            middleware: Vec::new(),
            attached: std::collections::HashSet::new(),
        }
    }

    /// Attach `middleware` if its pattern's key (an index into the owning
    /// registry's middleware table) isn't already attached.
    pub fn attach_if_new(&mut self, key: usize, middleware: Arc<dyn Middleware>) {
        if self.attached.insert(key) {
            self.middleware.push(middleware);
        }
    }
}

/// The remaining middleware chain plus the terminal handler, handed to a
/// [`Middleware`] so it can invoke downstream processing.
pub struct Next<'a> {
    pub(crate) chain: &'a [MiddlewareEntry],
    pub(crate) handler: &'a dyn Handler,
    pub(crate) index: usize,
    pub(crate) called: Arc<parking_lot::Mutex<Option<RouterResult<()>>>>,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [MiddlewareEntry], handler: &'a dyn Handler) -> Self {
        Self {
            chain,
            handler,
            index: 0,
            called: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Invoke the rest of the chain. A second call on the same `Next`
    /// returns the first call's outcome without re-running anything.
    pub async fn call(&self, ctx: &mut RequestContext) -> RouterResult<()> {
        if let Some(outcome) = self.called.lock().clone() {
            tracing::warn!("middleware called next() more than once");
            return outcome;
        }
        let outcome = self.run(ctx).await;
        *self.called.lock() = Some(outcome.clone());
        outcome
    }

    fn run<'b>(&'b self, ctx: &'b mut RequestContext) -> BoxFuture<'b, RouterResult<()>> {
        Box::pin(async move {
            let mut i = self.index;
            while i < self.chain.len() {
                let entry = &self.chain[i];
                if let Some(params) = entry.path.matches_path(&ctx.core.path) {
                    let next = Next {
                        chain: self.chain,
                        handler: self.handler,
                        index: i + 1,
                        called: Arc::new(parking_lot::Mutex::new(None)),
                    };
                    if params.is_empty() {
                        return entry.middleware.call(ctx, next).await;
                    }
                    let previous = std::mem::replace(&mut ctx.core, chain_core::Context::new(""));
                    ctx.core = previous.with_params(params);
                    return entry.middleware.call(ctx, next).await;
                }
                i += 1;
            }
            self.handler.call(ctx).await
        })
    }
}
