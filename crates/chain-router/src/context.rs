//! Router-level request context: the I/O-free [`chain_core::Context`] plus
//! the concrete hyper request parts and the [`ResponseSpy`].

use bytes::Bytes;
use http::request::Parts;
use http::Request;
use http_body_util::BodyExt;
use hyper::body::Incoming;

use crate::error::{RouterError, RouterResult};
use crate::response::ResponseSpy;

pub struct RequestContext {
    pub core: chain_core::Context,
    pub parts: Parts,
    body: Option<Incoming>,
    pub response: ResponseSpy,
}

impl RequestContext {
    pub fn new(path: &str, request: Request<Incoming>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            core: chain_core::Context::new(path),
            parts,
            body: Some(body),
            response: ResponseSpy::new(),
        }
    }

    pub fn method(&self) -> &str {
        self.parts.method.as_str()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.core.param(name)
    }

    /// Read the entire request body. Can only be called once; a second
    /// call surfaces the "body read failure" transport error.
    pub async fn read_body(&mut self) -> RouterResult<Bytes> {
        let body = self.body.take().ok_or(RouterError::BodyReadFailure)?;
        body.collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|_| RouterError::BodyReadFailure)
    }
}
