//! API version gate.
//!
//! Routes mounted under a `{version}` placeholder only accept versions the
//! server can serve: anything newer than the configured version, or not
//! parseable as a version at all, is answered with 404.

use std::fmt;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, RawPathParams, State},
    http::{header, uri::PathAndQuery, HeaderValue, Request, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use semver::Version;

/// Name of the path placeholder carrying the version.
pub const VERSION_PARAM: &str = "version";

/// The version a request was accepted under, in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestVersion(pub Version);

impl fmt::Display for RequestVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lenient version parsing.
///
/// Accepts a leading `v`, surrounding whitespace, missing minor or patch
/// components and leading zeros: `v1.2` → `1.2.0`, `01.002.3` → `1.2.3`.
pub fn parse_tolerant(raw: &str) -> Option<Version> {
    let s = raw.trim();
    let s = s.strip_prefix(|c: char| c == 'v' || c == 'V').unwrap_or(s);

    let (core, suffix) = match s.find(|c: char| c == '-' || c == '+') {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };

    let mut components = Vec::with_capacity(3);
    for part in core.split('.') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let trimmed = part.trim_start_matches('0');
        components.push(if trimmed.is_empty() { "0" } else { trimmed });
    }
    if components.len() > 3 {
        return None;
    }
    while components.len() < 3 {
        components.push("0");
    }

    Version::parse(&format!("{}{}", components.join("."), suffix)).ok()
}

/// State for [`version_gate`].
#[derive(Debug, Clone)]
pub struct VersionGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    api_version: Version,
    server_header: Option<HeaderValue>,
}

impl VersionGate {
    /// `api_version` is the newest version served. An unparseable value
    /// degrades to `0.0.0`.
    pub fn new(api_version: &str, name: &str, server_version: &str) -> Self {
        let api_version = parse_tolerant(api_version).unwrap_or_else(|| {
            tracing::warn!(version = %api_version, "Unparseable api version, gating at 0.0.0");
            Version::new(0, 0, 0)
        });

        let server_header = HeaderValue::from_str(&format!("{name}/{server_version}")).ok();
        if server_header.is_none() {
            tracing::warn!(name = %name, "Server name is not a valid header value");
        }

        Self {
            inner: Arc::new(GateInner {
                api_version,
                server_header,
            }),
        }
    }

    pub fn api_version(&self) -> &Version {
        &self.inner.api_version
    }

    /// Accept `raw` if it parses and is not newer than the api version.
    pub fn accept(&self, raw: &str) -> Option<Version> {
        parse_tolerant(raw).filter(|v| v <= &self.inner.api_version)
    }
}

/// Reject unsupported versions, rewrite the version segment to its
/// canonical form and stamp the `Server` header on the response.
pub async fn version_gate(State(gate): State<VersionGate>, req: Request<Body>, next: Next) -> Response {
    let (mut parts, body) = req.into_parts();

    let raw = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => params
            .iter()
            .find(|(k, _)| *k == VERSION_PARAM)
            .map(|(_, v)| v.to_string()),
        Err(_) => None,
    };

    let Some(raw) = raw else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(version) = gate.accept(&raw) else {
        tracing::debug!(version = %raw, supported = %gate.inner.api_version, "Unsupported api version");
        return StatusCode::NOT_FOUND.into_response();
    };

    let canonical = version.to_string();
    if canonical != raw {
        parts.uri = rewrite_segment(&parts.uri, &raw, &canonical);
    }
    parts.extensions.insert(RequestVersion(version));

    let mut response = next.run(Request::from_parts(parts, body)).await;
    if let Some(server) = &gate.inner.server_header {
        response.headers_mut().entry(header::SERVER).or_insert(server.clone());
    }
    response
}

/// Replace the first occurrence of `from` in the path. The query is kept.
fn rewrite_segment(uri: &Uri, from: &str, to: &str) -> Uri {
    let path = uri.path().replacen(from, to, 1);
    let path_and_query = match uri.query() {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };

    let mut uri_parts = uri.clone().into_parts();
    match PathAndQuery::try_from(path_and_query) {
        Ok(pq) => uri_parts.path_and_query = Some(pq),
        Err(_) => return uri.clone(),
    }
    Uri::from_parts(uri_parts).unwrap_or_else(|_| uri.clone())
}
