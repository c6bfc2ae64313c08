//! Response spy (the response-writer spy contract) and the response
//! helper surface (OK/Created/..., JSON, byte-range+ETag, Redirect,
//! cookies).

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{RouterError, RouterResult};

type Hook = Box<dyn FnOnce() + Send>;

/// Wraps the eventual HTTP response, deferring the first header/body write
/// so `before_send`/`after_send` hooks can still be registered right up
/// until a handler actually produces output.
pub struct ResponseSpy {
    pub status: StatusCode,
    pub headers: HeaderMap,
    before_send: Vec<Hook>,
    after_send: Vec<Hook>,
    first_write_done: bool,
    completed: bool,
    body: Vec<u8>,
    stream_tx: Option<mpsc::UnboundedSender<Bytes>>,
    stream_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl ResponseSpy {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            before_send: Vec::new(),
            after_send: Vec::new(),
            first_write_done: false,
            completed: false,
            body: Vec::new(),
            stream_tx: None,
            stream_rx: None,
        }
    }

    /// Switch this response into streaming mode (used by the SSE
    /// transport): subsequent `write_body` calls push onto an internal
    /// channel instead of buffering. The server layer takes the matching
    /// receiver via [`Self::take_stream_receiver`] to build the body.
    pub fn enable_streaming(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.stream_tx = Some(tx);
        self.stream_rx = Some(rx);
    }

    pub fn take_stream_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.stream_rx.take()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream_tx.is_some()
    }

    /// Whether this response writer can flush a chunk mid-stream. Every
    /// writer this crate produces is frame-per-send (buffered or
    /// streaming), so this always holds; a transport built on a writer
    /// without that property would report `false` here instead.
    pub fn supports_flush(&self) -> bool {
        true
    }

    pub fn before_send<F: FnOnce() + Send + 'static>(&mut self, cb: F) -> RouterResult<()> {
        if self.first_write_done {
            return Err(RouterError::Handler("AlreadySent".to_string()));
        }
        self.before_send.push(Box::new(cb));
        Ok(())
    }

    pub fn after_send<F: FnOnce() + Send + 'static>(&mut self, cb: F) -> RouterResult<()> {
        if self.first_write_done {
            return Err(RouterError::Handler("AlreadySent".to_string()));
        }
        self.after_send.push(Box::new(cb));
        Ok(())
    }

    fn fire_before_send(&mut self) {
        if self.first_write_done {
            return;
        }
        self.first_write_done = true;
        for cb in self.before_send.drain(..).rev() {
            cb();
        }
    }

    pub fn set_status(&mut self, status: u16) -> &mut Self {
        self.fire_before_send();
        self.status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self
    }

    pub fn set_header(&mut self, name: &'static str, value: impl Into<String>) -> &mut Self {
        self.fire_before_send();
        if let Ok(v) = HeaderValue::from_str(&value.into()) {
            self.headers.insert(name, v);
        }
        self
    }

    pub fn write_body(&mut self, bytes: impl Into<Bytes>) {
        self.fire_before_send();
        let bytes = bytes.into();
        if let Some(tx) = &self.stream_tx {
            let _ = tx.send(bytes);
        } else {
            self.body.extend_from_slice(&bytes);
        }
    }

    /// Like [`Self::write_body`], but reports whether a streaming send
    /// actually reached a live receiver (`false` means the client went
    /// away). Buffered (non-streaming) writes always succeed.
    pub fn write_chunk(&mut self, bytes: impl Into<Bytes>) -> bool {
        self.fire_before_send();
        let bytes = bytes.into();
        match &self.stream_tx {
            Some(tx) => tx.send(bytes).is_ok(),
            None => {
                self.body.extend_from_slice(&bytes);
                true
            }
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Finalize the response: fires `before_send` if nothing was written
    /// (headers-only response) and runs `after_send` exactly once.
    pub fn finish(&mut self) {
        self.fire_before_send();
        if self.completed {
            return;
        }
        self.completed = true;
        for cb in self.after_send.drain(..) {
            cb();
        }
    }
}

impl Default for ResponseSpy {
    fn default() -> Self {
        Self::new()
    }
}

// ---- response helpers -----------------------------------------------------

pub fn ok(resp: &mut ResponseSpy) {
    resp.set_status(200);
}

pub fn created(resp: &mut ResponseSpy) {
    resp.set_status(201);
}

pub fn no_content(resp: &mut ResponseSpy) {
    resp.set_status(204);
}

pub fn bad_request(resp: &mut ResponseSpy, message: &str) {
    resp.set_status(400);
    resp.write_body(Bytes::copy_from_slice(message.as_bytes()));
}

pub fn unauthorized(resp: &mut ResponseSpy) {
    resp.set_status(401);
}

pub fn forbidden(resp: &mut ResponseSpy) {
    resp.set_status(403);
}

pub fn not_found(resp: &mut ResponseSpy) {
    resp.set_status(404);
}

pub fn too_many_requests(resp: &mut ResponseSpy) {
    resp.set_status(429);
}

pub fn internal_server_error(resp: &mut ResponseSpy) {
    resp.set_status(500);
}

pub fn not_implemented(resp: &mut ResponseSpy) {
    resp.set_status(501);
}

pub fn service_unavailable(resp: &mut ResponseSpy) {
    resp.set_status(503);
}

/// Sets `Content-Type: application/json` and serializes `value` as the body.
pub fn json<T: Serialize>(resp: &mut ResponseSpy, value: &T) -> RouterResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| RouterError::Handler(e.to_string()))?;
    resp.set_header("content-type", "application/json");
    resp.write_body(bytes);
    Ok(())
}

/// 301 for GET, 308 for every other method.
pub fn redirect(resp: &mut ResponseSpy, method: &str, location: &str) {
    let status = if method.eq_ignore_ascii_case("GET") { 301 } else { 308 };
    resp.set_status(status);
    resp.set_header("location", location.to_string());
}

/// xxh64 content-addressed ETag, base64url-encoded.
pub fn etag_for(bytes: &[u8]) -> String {
    let hash = xxhash_rust::xxh64::xxh64(bytes, 0);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, hash.to_be_bytes())
}

/// Serve `bytes` honoring a `Range: bytes=start-end` request header, with
/// `ETag` and `Content-Length` set either way.
pub fn serve_bytes_with_range(resp: &mut ResponseSpy, bytes: &[u8], range_header: Option<&str>) {
    let etag = etag_for(bytes);
    resp.set_header("etag", etag);

    let total = bytes.len();
    if let Some(range) = range_header.and_then(parse_byte_range) {
        let (start, end) = range;
        if start < total && start <= end {
            let end = end.min(total.saturating_sub(1));
            resp.set_status(206);
            resp.set_header("content-range", format!("bytes {start}-{end}/{total}"));
            resp.set_header("content-length", (end - start + 1).to_string());
            resp.write_body(Bytes::copy_from_slice(&bytes[start..=end]));
            return;
        }
    }
    resp.set_status(200);
    resp.set_header("content-length", total.to_string());
    resp.write_body(Bytes::copy_from_slice(bytes));
}

fn parse_byte_range(header: &str) -> Option<(usize, usize)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = if end.is_empty() { usize::MAX } else { end.parse().ok()? };
    Some((start, end))
}

/// Build a `Set-Cookie` header value.
pub fn set_cookie(resp: &mut ResponseSpy, name: &str, value: &str, max_age_secs: Option<u64>) {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax");
    if let Some(secs) = max_age_secs {
        cookie.push_str(&format!("; Max-Age={secs}"));
    }
    resp.set_header("set-cookie", cookie);
}

pub fn remove_cookie(resp: &mut ResponseSpy, name: &str) {
    resp.set_header(
        "set-cookie",
        format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_send_fires_once_in_reverse_order() {
        let calls = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut resp = ResponseSpy::new();
        for tag in ["a", "b", "c"] {
            let calls = calls.clone();
            resp.before_send(move || calls.lock().push(tag)).unwrap();
        }
        resp.write_body(Bytes::from_static(b"hi"));
        assert_eq!(*calls.lock(), vec!["c", "b", "a"]);
    }

    #[test]
    fn registering_after_first_write_fails() {
        let mut resp = ResponseSpy::new();
        resp.write_body(Bytes::from_static(b"x"));
        assert!(resp.before_send(|| {}).is_err());
    }

    #[test]
    fn after_send_runs_once_even_on_headers_only_response() {
        let calls = std::sync::Arc::new(parking_lot::Mutex::new(0));
        let mut resp = ResponseSpy::new();
        let counter = calls.clone();
        resp.after_send(move || *counter.lock() += 1).unwrap();
        resp.finish();
        resp.finish();
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn redirect_status_depends_on_method() {
        let mut resp = ResponseSpy::new();
        redirect(&mut resp, "GET", "/x");
        assert_eq!(resp.status.as_u16(), 301);
        let mut resp = ResponseSpy::new();
        redirect(&mut resp, "POST", "/x");
        assert_eq!(resp.status.as_u16(), 308);
    }

    #[test]
    fn range_request_slices_body() {
        let mut resp = ResponseSpy::new();
        serve_bytes_with_range(&mut resp, b"0123456789", Some("bytes=2-4"));
        assert_eq!(resp.status.as_u16(), 206);
        assert_eq!(resp.body(), b"234");
    }

    #[test]
    fn missing_range_serves_whole_body() {
        let mut resp = ResponseSpy::new();
        serve_bytes_with_range(&mut resp, b"hello", None);
        assert_eq!(resp.status.as_u16(), 200);
        assert_eq!(resp.body(), b"hello");
    }
}
