//! Per-request scope handed to handlers.

use axum::body::{Body, Bytes};
use axum::http::{request::Parts, Extensions, HeaderMap, Method, Uri};
use tracing::Span;

use crate::dispatch::binder::RequestInput;
use crate::http::middleware::version::RequestVersion;
use crate::http::writer::ResponseWriter;

/// Everything a handler can see about the request it is serving.
///
/// Built by the dispatcher after authorization, so authorizer values are
/// already present in [`extensions`](Self::extensions).
#[derive(Debug)]
pub struct RequestContext {
    parts: Parts,
    path: Vec<(String, String)>,
    buffered: Bytes,
    body: Option<Body>,
    writer: ResponseWriter,
    log: Span,
    fallback_version: String,
}

impl RequestContext {
    pub(crate) fn new(
        parts: Parts,
        path: Vec<(String, String)>,
        writer: ResponseWriter,
        log: Span,
        fallback_version: String,
    ) -> Self {
        Self {
            parts,
            path,
            buffered: Bytes::new(),
            body: None,
            writer,
            log,
            fallback_version,
        }
    }

    /// Body that has not been read.
    pub(crate) fn with_stream(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Body already read in full for binding.
    pub(crate) fn with_buffered(mut self, body: Bytes) -> Self {
        self.buffered = body;
        self
    }

    pub(crate) fn input(&self) -> RequestInput<'_> {
        RequestInput {
            parts: &self.parts,
            path: &self.path,
            body: &self.buffered,
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Request URI. With versioning on, the version segment is canonical.
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn parts(&self) -> &Parts {
        &self.parts
    }

    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    /// A value placed on the request by an authorizer or context hook.
    pub fn auth<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.parts.extensions.get::<T>()
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Matched path placeholders in route order.
    pub fn path_params(&self) -> &[(String, String)] {
        &self.path
    }

    /// The accepted API version, or the server's own when the request
    /// did not pass a version gate.
    pub fn version(&self) -> String {
        match self.parts.extensions.get::<RequestVersion>() {
            Some(v) => v.to_string(),
            None => self.fallback_version.clone(),
        }
    }

    /// Direct access to the response. Handlers that write here should
    /// return `()` so nothing else is written.
    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    /// The server's log span.
    pub fn log(&self) -> &Span {
        &self.log
    }

    /// The request body. Handlers with parameters get the bytes that were
    /// read for binding; later calls return an empty body.
    pub fn take_body(&mut self) -> Body {
        match self.body.take() {
            Some(body) => body,
            None => Body::from(std::mem::take(&mut self.buffered)),
        }
    }
}
