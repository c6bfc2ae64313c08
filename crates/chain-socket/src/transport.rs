//! SSE transport: mounts a GET (stream) and POST (dispatch) endpoint pair
//! under `<endpoint>/sse`, backed by a cookie-keyed session resume.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chain_core::contracts::SessionStore;
use chain_router::{response, Handler, Middleware, Next, RequestContext, Router, RouterResult};
use parking_lot::RwLock;
use tracing::warn;

use crate::socket::{Session, SocketHandler, DEFAULT_OUTBOUND_CAPACITY};

const DEFAULT_TAB_KEY: &str = "sid";
const DEFAULT_RESUME_WINDOW: Duration = Duration::from_secs(15);
const TAB_KEY_STORE_SLOT: &str = "chain_socket_sse_tab_key";

/// Invoked once a session has been freshly created (not resumed) for a
/// new GET connection, so the embedding application can e.g. record
/// metadata or push a welcome message.
pub trait ConnectHook: Send + Sync {
    fn on_connect(&self, session: &Arc<Session>, query: &HashMap<String, String>);
}

#[derive(Clone)]
pub struct CorsConfig {
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, OPTIONS".to_string(),
            allow_headers: "content-type".to_string(),
            max_age_secs: 600,
        }
    }
}

pub struct SseTransport {
    endpoint: String,
    handler: Arc<SocketHandler>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    outbound_capacity: usize,
    resume_window: Duration,
    tab_key_param: String,
    session_store: Arc<dyn SessionStore>,
    on_connect: Option<Arc<dyn ConnectHook>>,
    cors: Option<CorsConfig>,
}

impl SseTransport {
    pub fn new(endpoint: impl Into<String>, handler: Arc<SocketHandler>, session_store: Arc<dyn SessionStore>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            handler,
            sessions: RwLock::new(HashMap::new()),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            resume_window: DEFAULT_RESUME_WINDOW,
            tab_key_param: DEFAULT_TAB_KEY.to_string(),
            session_store,
            on_connect: None,
            cors: None,
        })
    }

    pub fn with_resume_window(mut self: Arc<Self>, window: Duration) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("configure before mounting").resume_window = window;
        self
    }

    pub fn with_on_connect(mut self: Arc<Self>, hook: Arc<dyn ConnectHook>) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("configure before mounting").on_connect = Some(hook);
        self
    }

    pub fn with_cors(mut self: Arc<Self>, cors: CorsConfig) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("configure before mounting").cors = Some(cors);
        self
    }

    /// Register the GET/POST routes, the cookie-session middleware, and
    /// (if configured) the CORS preflight handler and response headers.
    pub fn mount(self: &Arc<Self>, router: &Router) {
        let path = format!("{}/sse", self.endpoint);

        router.use_middleware(
            None,
            Some(&path),
            Arc::new(CookieSessionMiddleware { transport: self.clone() }) as Arc<dyn Middleware>,
        );

        router.handle("GET", &path, Arc::new(GetHandler { transport: self.clone() }) as Arc<dyn Handler>);
        router.handle("POST", &path, Arc::new(PostHandler { transport: self.clone() }) as Arc<dyn Handler>);

        if let Some(cors) = self.cors.clone() {
            router.use_middleware(
                None,
                Some(&path),
                Arc::new(CorsHeadersMiddleware { cors: cors.clone() }) as Arc<dyn Middleware>,
            );
            router.handle(
                "OPTIONS",
                &path,
                Arc::new(CorsPreflightHandler { cors }) as Arc<dyn Handler>,
            );
        }
    }

    fn tab_key(&self, ctx: &RequestContext) -> String {
        ctx.core
            .get::<String>(TAB_KEY_STORE_SLOT)
            .unwrap_or_else(|| DEFAULT_TAB_KEY.to_string())
    }

    fn query_params(ctx: &RequestContext) -> HashMap<String, String> {
        ctx.query().map(parse_query).unwrap_or_default()
    }

    async fn resume(&self, cookie_value: &str) -> Option<Arc<Session>> {
        let (socket_id, _data) = self.session_store.get(cookie_value).await.ok().flatten()?;
        self.sessions.read().get(&socket_id).cloned()
    }

    fn cookie_header(ctx: &RequestContext) -> Option<&str> {
        ctx.header("cookie")
    }

    fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
        header.split(';').find_map(|part| {
            let part = part.trim();
            part.strip_prefix(name).and_then(|rest| rest.strip_prefix('='))
        })
    }

    async fn connect(&self, query: &HashMap<String, String>) -> Arc<Session> {
        let socket_id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(socket_id.clone(), self.outbound_capacity, self.handler.clone());
        self.sessions.write().insert(socket_id.clone(), session.clone());
        if let Some(hook) = &self.on_connect {
            hook.on_connect(&session, query);
        }
        session
    }

    async fn handle_get(&self, ctx: &mut RequestContext) -> RouterResult<()> {
        if !ctx.response.supports_flush() {
            response::bad_request(&mut ctx.response, "response writer does not support flush");
            return Ok(());
        }

        let tab_key = self.tab_key(ctx);
        let query = Self::query_params(ctx);

        let existing = Self::cookie_header(ctx)
            .and_then(|header| Self::find_cookie(header, &tab_key))
            .map(str::to_string);

        let (session, resumed) = match &existing {
            Some(cookie_value) => match self.resume(cookie_value).await {
                Some(session) => {
                    session.stop_scheduled_shutdown();
                    (session, true)
                }
                None => (self.connect(&query).await, false),
            },
            None => (self.connect(&query).await, false),
        };

        if !resumed {
            let cookie_value = self
                .session_store
                .put(session.id(), session.id().as_bytes())
                .await
                .map_err(|e| chain_router::RouterError::Handler(e.to_string()))?;
            response::set_cookie(&mut ctx.response, &tab_key, &cookie_value, None);
        }

        ctx.response.set_status(200);
        ctx.response.set_header("content-type", "text/event-stream");
        ctx.response.set_header("cache-control", "no-store");
        ctx.response.set_header("x-accel-buffering", "no");
        if matches!(ctx.parts.version, http::Version::HTTP_09 | http::Version::HTTP_10 | http::Version::HTTP_11) {
            ctx.response.set_header("connection", "keep-alive");
        }
        ctx.response.enable_streaming();

        let Some(mut outbound) = session.take_receiver().await else {
            warn!(socket_id = session.id(), "chain-socket: GET already streaming for this session");
            return Ok(());
        };

        loop {
            match outbound.recv().await {
                Some(bytes) => {
                    let frame = format!("data: {}\n\n", String::from_utf8_lossy(&bytes));
                    if !ctx.response.write_chunk(Bytes::from(frame.into_bytes())) {
                        session.return_receiver(outbound).await;
                        session.schedule_shutdown(self.resume_window);
                        break;
                    }
                }
                None => {
                    session.return_receiver(outbound).await;
                    session.schedule_shutdown(self.resume_window);
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_post(&self, ctx: &mut RequestContext) -> RouterResult<()> {
        let tab_key = self.tab_key(ctx);
        let session = match Self::cookie_header(ctx).and_then(|header| Self::find_cookie(header, &tab_key)) {
            Some(cookie_value) => self.resume(cookie_value).await,
            None => None,
        };

        let Some(session) = session else {
            ctx.response.set_status(410);
            return Ok(());
        };

        let body = ctx.read_body().await?;
        session
            .dispatch(body)
            .await
            .map_err(|e| chain_router::RouterError::Handler(e.to_string()))?;
        response::ok(&mut ctx.response);
        Ok(())
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((percent_decode(key), percent_decode(value)))
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

struct GetHandler {
    transport: Arc<SseTransport>,
}

#[async_trait]
impl Handler for GetHandler {
    async fn call(&self, ctx: &mut RequestContext) -> RouterResult<()> {
        self.transport.handle_get(ctx).await
    }
}

struct PostHandler {
    transport: Arc<SseTransport>,
}

#[async_trait]
impl Handler for PostHandler {
    async fn call(&self, ctx: &mut RequestContext) -> RouterResult<()> {
        self.transport.handle_post(ctx).await
    }
}

/// Resolves which query parameter names the per-tab session cookie, and
/// stashes it on the context so the GET/POST handlers don't reparse it.
struct CookieSessionMiddleware {
    transport: Arc<SseTransport>,
}

#[async_trait]
impl Middleware for CookieSessionMiddleware {
    async fn call(&self, ctx: &mut RequestContext, next: Next<'_>) -> RouterResult<()> {
        let tab_key = SseTransport::query_params(ctx)
            .get(&self.transport.tab_key_param)
            .cloned()
            .unwrap_or_else(|| self.transport.tab_key_param.clone());
        ctx.core.set(TAB_KEY_STORE_SLOT, &tab_key);
        next.call(ctx).await
    }
}

struct CorsHeadersMiddleware {
    cors: CorsConfig,
}

#[async_trait]
impl Middleware for CorsHeadersMiddleware {
    async fn call(&self, ctx: &mut RequestContext, next: Next<'_>) -> RouterResult<()> {
        let outcome = next.call(ctx).await;
        ctx.response.set_header("access-control-allow-origin", self.cors.allow_origin.clone());
        outcome
    }
}

struct CorsPreflightHandler {
    cors: CorsConfig,
}

#[async_trait]
impl Handler for CorsPreflightHandler {
    async fn call(&self, ctx: &mut RequestContext) -> RouterResult<()> {
        ctx.response.set_status(204);
        ctx.response.set_header("access-control-allow-origin", self.cors.allow_origin.clone());
        ctx.response.set_header("access-control-allow-methods", self.cors.allow_methods.clone());
        ctx.response.set_header("access-control-allow-headers", self.cors.allow_headers.clone());
        ctx.response.set_header("access-control-max-age", self.cors.max_age_secs.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_query_string() {
        let params = parse_query("sid=abc&foo=bar+baz");
        assert_eq!(params.get("sid").map(String::as_str), Some("abc"));
        assert_eq!(params.get("foo").map(String::as_str), Some("bar baz"));
    }

    #[test]
    fn decodes_percent_escapes() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("100%25"), "100%");
    }

    #[test]
    fn finds_named_cookie_among_several() {
        let header = "a=1; sid=xyz; b=2";
        assert_eq!(SseTransport::find_cookie(header, "sid"), Some("xyz"));
        assert_eq!(SseTransport::find_cookie(header, "missing"), None);
    }
}
