//! Buffered response writer shared between the dispatcher and handlers.
//!
//! Follows HTTP writer semantics: the first status written is authoritative,
//! header changes after the status is written are ignored, and writing body
//! bytes implicitly writes a 200 status.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

#[derive(Debug, Default)]
struct WriterState {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Handle to the response being produced for one request.
///
/// Clones share the same underlying response.
#[derive(Debug, Clone, Default)]
pub struct ResponseWriter {
    inner: Arc<Mutex<WriterState>>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace a header. Returns false if the status was already written.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) -> bool {
        let mut state = self.lock();
        if state.status.is_some() {
            return false;
        }
        state.headers.insert(name, value);
        true
    }

    /// Add a header value alongside existing ones.
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) -> bool {
        let mut state = self.lock();
        if state.status.is_some() {
            return false;
        }
        state.headers.append(name, value);
        true
    }

    pub fn remove_header(&self, name: &HeaderName) -> bool {
        let mut state = self.lock();
        if state.status.is_some() {
            return false;
        }
        state.headers.remove(name);
        true
    }

    pub fn header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.lock().headers.get(name).cloned()
    }

    /// Snapshot of the current headers.
    pub fn headers(&self) -> HeaderMap {
        self.lock().headers.clone()
    }

    /// Write the status line. Only the first call has any effect.
    pub fn write_header(&self, status: StatusCode) -> bool {
        let mut state = self.lock();
        if state.status.is_some() {
            return false;
        }
        state.status = Some(status);
        true
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    pub fn headers_sent(&self) -> bool {
        self.lock().status.is_some()
    }

    /// Append body bytes, writing a 200 status first if none was written.
    pub fn write(&self, data: &[u8]) {
        let mut state = self.lock();
        state.status.get_or_insert(StatusCode::OK);
        state.body.extend_from_slice(data);
    }

    pub fn body_len(&self) -> usize {
        self.lock().body.len()
    }

    /// An [`io::Write`] view of the body.
    pub fn body(&self) -> BodyWriter {
        BodyWriter { writer: self.clone() }
    }

    /// Discard everything written so far: status, headers and body.
    ///
    /// Nothing leaves the writer before [`take_response`](Self::take_response),
    /// so a failed write can still be replaced by an error response.
    pub fn reset(&self) {
        *self.lock() = WriterState::default();
    }

    /// Take the accumulated response, leaving the writer empty.
    ///
    /// The body is complete, so any `Content-Length` set by the producer is
    /// dropped and recomputed by the server.
    pub fn take_response(&self) -> Response {
        let state = std::mem::take(&mut *self.lock());
        let mut response = Response::new(Body::from(state.body));
        *response.status_mut() = state.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = state.headers;
        response.headers_mut().remove(header::CONTENT_LENGTH);
        response
    }
}

/// [`io::Write`] adapter over a [`ResponseWriter`] body.
#[derive(Debug, Clone)]
pub struct BodyWriter {
    writer: ResponseWriter,
}

impl io::Write for BodyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn first_status_wins() {
        let w = ResponseWriter::new();
        assert!(w.write_header(StatusCode::CREATED));
        assert!(!w.write_header(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(w.status(), Some(StatusCode::CREATED));
    }

    #[test]
    fn headers_frozen_after_status() {
        let w = ResponseWriter::new();
        assert!(w.set_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain")));
        w.write(b"hi");
        assert!(!w.set_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json")));

        let response = w.take_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn body_writer_shares_state() {
        let w = ResponseWriter::new();
        w.set_header(header::CONTENT_LENGTH, HeaderValue::from_static("99"));
        write!(w.body(), "hello {}", 42).unwrap();
        assert_eq!(w.body_len(), 8);

        let response = w.take_response();
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(w.body_len(), 0);
    }

    #[test]
    fn reset_discards_partial_response() {
        let w = ResponseWriter::new();
        w.set_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        w.write(b"partial");

        w.reset();
        assert!(!w.headers_sent());
        assert!(w.write_header(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(w.header(&header::CONTENT_TYPE).is_none());
        assert_eq!(w.body_len(), 0);
    }
}
