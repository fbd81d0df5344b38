//! Parameter binding.
//!
//! # Merge order
//! ```text
//! path variables → query string → body (JSON object fields or form values)
//! ```
//! Later sources overwrite same-named fields. A JSON body that is not an
//! object is decoded on its own and replaces everything before it.
//!
//! Types implementing [`BindRequest`] themselves take full control; the
//! generic merge above only runs through [`Params`].

use axum::body::Bytes;
use axum::http::{header, request::Parts};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::dispatch::decode::{DecodeError, Fields, Source};

/// Binding failure. Always answered with 400.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to read request body: {0}")]
    Read(String),

    #[error("invalid {origin} parameter {key:?}: {message}")]
    Field {
        origin: Source,
        key: String,
        message: String,
    },

    #[error("invalid json body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid parameters: {0}")]
    Invalid(String),
}

impl From<DecodeError> for BindError {
    fn from(e: DecodeError) -> Self {
        match e.origin {
            Some((origin, key)) => Self::Field {
                origin,
                key,
                message: e.message,
            },
            None => Self::Invalid(e.message),
        }
    }
}

/// Everything a binder may read from the request.
#[derive(Debug, Clone, Copy)]
pub struct RequestInput<'a> {
    pub parts: &'a Parts,
    /// Matched path placeholders, in route order.
    pub path: &'a [(String, String)],
    /// Buffered request body, empty when none was sent.
    pub body: &'a Bytes,
}

impl RequestInput<'_> {
    /// Media type of the body without parameters (`; charset=..`).
    pub fn content_type(&self) -> Option<&str> {
        self.parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim)
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match self.parts.uri.query() {
            Some(q) => url::form_urlencoded::parse(q.as_bytes()).into_owned().collect(),
            None => Vec::new(),
        }
    }
}

/// A route parameter destination.
///
/// Implement this directly for custom binding; wrap a `Deserialize` type in
/// [`Params`] for the generic merge.
pub trait BindRequest: Sized + Send + 'static {
    fn bind_request(input: &RequestInput<'_>) -> Result<Self, BindError>;
}

/// Generic structural binding for any deserializable type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params<T>(pub T);

impl<T> BindRequest for Params<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn bind_request(input: &RequestInput<'_>) -> Result<Self, BindError> {
        bind_structural(input).map(Params)
    }
}

/// Decode `T` from path, query and body, in that order.
pub fn bind_structural<T: DeserializeOwned>(input: &RequestInput<'_>) -> Result<T, BindError> {
    let mut fields = Fields::default();

    if !input.path.is_empty() {
        fields.merge_text(Source::Path, input.path.iter().cloned());
    }

    let query = input.query_pairs();
    if !query.is_empty() {
        fields.merge_text(Source::Query, query);
    }

    if !input.body.is_empty() {
        match input.content_type() {
            Some("application/json") => match serde_json::from_slice::<serde_json::Value>(input.body)? {
                serde_json::Value::Object(object) => fields.merge_json(object),
                other => return Ok(serde_json::from_value(other)?),
            },
            Some("application/x-www-form-urlencoded") => {
                fields.merge_text(Source::Form, url::form_urlencoded::parse(input.body).into_owned());
            }
            _ => {}
        }
    }

    Ok(fields.decode()?)
}
