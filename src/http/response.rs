//! Response model.
//!
//! A [`Response`] is built by handler code, configured with the builder
//! methods, and written exactly once by the dispatcher. Writing finalizes
//! it: later builder calls are ignored.
//!
//! # Payload precedence
//! ```text
//! empty            → status line only
//! bytes / text     → written verbatim
//! Encode           → delegated, content type ignored
//! reader           → copied (exactly Content-Length bytes when set)
//! structured value → XML for application/xml, JSON otherwise
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::http::writer::ResponseWriter;

/// Failure while writing a response body.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("xml encoding failed: {0}")]
    Xml(String),
    #[error("response already written")]
    AlreadyWritten,
}

/// Something that can write its own status, headers and payload.
pub trait Responder: Send {
    fn status(&self) -> StatusCode;

    /// Write into `w`. `request_headers` are the originating request's
    /// headers, consulted for content negotiation.
    fn write(&mut self, w: &ResponseWriter, request_headers: &HeaderMap) -> Result<(), EncodeError>;
}

/// A payload that encodes itself, bypassing content negotiation.
pub trait Encode: Send {
    fn encode(&self, w: &mut dyn Write) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Xml,
}

/// A serialisable value, encoded once the response format is known.
pub struct StructuredValue(Box<dyn FnOnce(Format, &mut dyn Write) -> Result<(), EncodeError> + Send>);

/// Response body.
#[derive(Default)]
pub enum Payload {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    Encoder(Box<dyn Encode>),
    /// Dropped after the write attempt, which releases whatever it holds.
    Reader(Box<dyn Read + Send>),
    Value(StructuredValue),
}

impl Payload {
    /// A structured value serialised according to the response content type.
    pub fn value<T: Serialize + Send + 'static>(value: T) -> Self {
        Self::Value(StructuredValue(Box::new(move |format, out| match format {
            Format::Json => {
                serde_json::to_writer(&mut *out, &value)?;
                out.write_all(b"\n")?;
                Ok(())
            }
            Format::Xml => {
                let xml = quick_xml::se::to_string(&value).map_err(|e| EncodeError::Xml(e.to_string()))?;
                out.write_all(xml.as_bytes())?;
                Ok(())
            }
        })))
    }

    pub fn encoder<E: Encode + 'static>(encoder: E) -> Self {
        Self::Encoder(Box::new(encoder))
    }

    pub fn reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::Reader(Box::new(reader))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(b) => b.is_empty(),
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Encoder(_) => f.write_str("Encoder"),
            Self::Reader(_) => f.write_str("Reader"),
            Self::Value(_) => f.write_str("Value"),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v.into())
    }
}

impl From<Bytes> for Payload {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

impl From<&'static [u8]> for Payload {
    fn from(v: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(v))
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Self::value(v)
    }
}

/// The common response type.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    payload: Payload,
    headers: HeaderMap,
    finalized: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(Payload::Empty)
    }
}

impl Response {
    /// Status 200, `Content-Type: application/json`.
    pub fn new(payload: impl Into<Payload>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Self {
            status: StatusCode::OK,
            payload: payload.into(),
            headers,
            finalized: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Shorthand for a structured payload.
    pub fn json<T: Serialize + Send + 'static>(value: T) -> Self {
        Self::new(Payload::value(value))
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        if !self.finalized {
            self.status = status;
        }
        self
    }

    /// Set a header, replacing earlier values. Invalid values are dropped.
    pub fn with_header<V>(mut self, name: HeaderName, value: V) -> Self
    where
        V: TryInto<HeaderValue>,
    {
        if self.finalized {
            return self;
        }
        match value.try_into() {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => tracing::warn!(header = %name, "Dropping invalid header value"),
        }
        self
    }

    /// 302 to `url`, with `overrides` merged into its query (later keys win).
    pub fn redirect<I, K, V>(url: &Url, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in url.query_pairs() {
            query.entry(k.into_owned()).or_default().push(v.into_owned());
        }
        for (k, v) in overrides {
            query.insert(k.into(), vec![v.into()]);
        }

        let mut target = url.clone();
        if query.is_empty() {
            target.set_query(None);
        } else {
            let mut pairs = target.query_pairs_mut();
            pairs.clear();
            for (k, values) in &query {
                for v in values {
                    pairs.append_pair(k, v);
                }
            }
        }

        Self::empty()
            .with_status(StatusCode::FOUND)
            .with_header(header::LOCATION, target.as_str())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn format(&self) -> Format {
        let essence = self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim);

        match essence {
            Some("application/xml") => Format::Xml,
            _ => Format::Json,
        }
    }

    fn write_payload(&self, payload: Payload, w: &ResponseWriter, out: &mut dyn Write) -> Result<(), EncodeError> {
        match payload {
            Payload::Empty => Ok(()),
            Payload::Bytes(b) => Ok(out.write_all(&b)?),
            Payload::Text(s) => Ok(out.write_all(s.as_bytes())?),
            Payload::Encoder(e) => Ok(e.encode(out)?),
            Payload::Reader(mut r) => {
                let limit = w
                    .header(&header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok().and_then(|s| s.trim().parse::<u64>().ok()));

                match limit {
                    Some(n) => {
                        let copied = io::copy(&mut r.by_ref().take(n), out)?;
                        if copied < n {
                            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                        }
                    }
                    None => {
                        io::copy(&mut r, out)?;
                    }
                }
                Ok(())
            }
            Payload::Value(StructuredValue(encode)) => encode(self.format(), out),
        }
    }
}

fn accepts_gzip(request_headers: &HeaderMap) -> bool {
    request_headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("gzip"))
}

impl Responder for Response {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn write(&mut self, w: &ResponseWriter, request_headers: &HeaderMap) -> Result<(), EncodeError> {
        if self.finalized {
            return Err(EncodeError::AlreadyWritten);
        }
        self.finalized = true;

        for (name, value) in &self.headers {
            w.append_header(name.clone(), value.clone());
        }

        let payload = std::mem::take(&mut self.payload);
        if payload.is_empty() {
            w.write_header(self.status);
            return Ok(());
        }

        if accepts_gzip(request_headers) {
            w.set_header(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            w.write_header(self.status);

            let mut gz = GzEncoder::new(w.body(), Compression::default());
            let written = self.write_payload(payload, w, &mut gz);
            let finished = gz.finish().map(drop).map_err(EncodeError::from);
            return written.and(finished);
        }

        w.write_header(self.status);
        let mut out = w.body();
        self.write_payload(payload, w, &mut out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: u32,
        name: String,
    }

    fn req(accept_encoding: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(ae) = accept_encoding {
            headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static(ae));
        }
        headers
    }

    fn body(w: &ResponseWriter) -> (StatusCode, HeaderMap, Vec<u8>) {
        let resp = w.take_response();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = futures_util::FutureExt::now_or_never(axum::body::to_bytes(resp.into_body(), usize::MAX))
            .unwrap()
            .unwrap();
        (status, headers, bytes.to_vec())
    }

    #[test]
    fn json_round_trip() {
        let widget = Widget { id: 1, name: "foo".into() };
        let w = ResponseWriter::new();
        Response::json(widget.clone())
            .with_status(StatusCode::CREATED)
            .write(&w, &req(None))
            .unwrap();

        let (status, headers, bytes) = body(&w);
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(serde_json::from_slice::<Widget>(&bytes).unwrap(), widget);
    }

    #[test]
    fn xml_when_requested() {
        let w = ResponseWriter::new();
        Response::json(Widget { id: 7, name: "bar".into() })
            .with_header(header::CONTENT_TYPE, "application/xml")
            .write(&w, &req(None))
            .unwrap();

        let (_, _, bytes) = body(&w);
        let xml = String::from_utf8(bytes).unwrap();
        assert!(xml.starts_with("<Widget>"), "{xml}");
        assert!(xml.contains("<name>bar</name>"), "{xml}");
    }

    #[test]
    fn empty_payload_writes_status_only() {
        let w = ResponseWriter::new();
        Response::empty()
            .with_status(StatusCode::NO_CONTENT)
            .write(&w, &req(Some("gzip")))
            .unwrap();

        let (status, headers, bytes) = body(&w);
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert!(bytes.is_empty());
    }

    #[test]
    fn text_and_bytes_verbatim() {
        let w = ResponseWriter::new();
        Response::new("plain").write(&w, &req(None)).unwrap();
        assert_eq!(body(&w).2, b"plain");

        let w = ResponseWriter::new();
        Response::new(vec![0u8, 1, 2]).write(&w, &req(None)).unwrap();
        assert_eq!(body(&w).2, vec![0u8, 1, 2]);
    }

    #[test]
    fn gzip_when_accepted() {
        let widget = Widget { id: 3, name: "zip".into() };
        let w = ResponseWriter::new();
        Response::json(widget.clone()).write(&w, &req(Some("deflate, gzip"))).unwrap();

        let (_, headers, bytes) = body(&w);
        assert_eq!(headers[header::CONTENT_ENCODING], "gzip");

        let mut decoded = Vec::new();
        GzDecoder::new(&bytes[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(serde_json::from_slice::<Widget>(&decoded).unwrap(), widget);
    }

    struct Csv;

    impl Encode for Csv {
        fn encode(&self, w: &mut dyn Write) -> io::Result<()> {
            w.write_all(b"id,name\n1,foo\n")
        }
    }

    #[test]
    fn encoder_bypasses_content_type() {
        let w = ResponseWriter::new();
        Response::new(Payload::encoder(Csv))
            .with_header(header::CONTENT_TYPE, "application/xml")
            .write(&w, &req(None))
            .unwrap();
        assert_eq!(body(&w).2, b"id,name\n1,foo\n");
    }

    struct Tracked {
        inner: io::Cursor<Vec<u8>>,
        closed: Arc<AtomicBool>,
    }

    impl Read for Tracked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn reader_honours_content_length_and_is_released() {
        let closed = Arc::new(AtomicBool::new(false));
        let reader = Tracked {
            inner: io::Cursor::new(b"0123456789".to_vec()),
            closed: closed.clone(),
        };

        let w = ResponseWriter::new();
        Response::new(Payload::reader(reader))
            .with_header(header::CONTENT_LENGTH, "4")
            .write(&w, &req(None))
            .unwrap();

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(body(&w).2, b"0123");
    }

    #[test]
    fn short_reader_fails_and_is_released() {
        let closed = Arc::new(AtomicBool::new(false));
        let reader = Tracked {
            inner: io::Cursor::new(b"01".to_vec()),
            closed: closed.clone(),
        };

        let w = ResponseWriter::new();
        let err = Response::new(Payload::reader(reader))
            .with_header(header::CONTENT_LENGTH, "4")
            .write(&w, &req(None))
            .unwrap_err();

        assert!(matches!(err, EncodeError::Io(_)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn builder_last_value_wins_and_freezes_after_write() {
        let mut resp = Response::new("x")
            .with_status(StatusCode::ACCEPTED)
            .with_status(StatusCode::CREATED)
            .with_header(header::CACHE_CONTROL, "no-cache")
            .with_header(header::CACHE_CONTROL, "no-store");

        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");

        let w = ResponseWriter::new();
        resp.write(&w, &req(None)).unwrap();
        assert!(resp.is_finalized());

        let resp = resp
            .with_status(StatusCode::IM_A_TEAPOT)
            .with_header(header::CACHE_CONTROL, "public");
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");

        let mut resp = resp;
        assert!(matches!(resp.write(&w, &req(None)), Err(EncodeError::AlreadyWritten)));
    }

    #[test]
    fn redirect_merges_query() {
        let url = Url::parse("https://example.com/cb?state=abc&b=1").unwrap();
        let resp = Response::redirect(&url, [("b", "2"), ("a", "x y")]);

        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers()[header::LOCATION],
            "https://example.com/cb?a=x+y&b=2&state=abc"
        );
    }
}
