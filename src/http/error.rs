//! Error responses.
//!
//! Every error path produces `{"message": "<text>"}` with the mapped status,
//! unless the error is an [`ApiError`] carrying its own status or payload.

use std::error::Error as StdError;

use axum::http::{header, HeaderValue, StatusCode};
use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use thiserror::Error;
use url::Url;

use crate::http::response::{Payload, Response};
use crate::http::writer::ResponseWriter;

/// Standard error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// An error that knows how it should be presented to the client.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    status: StatusCode,
    message: String,
    payload: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            payload: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Send `payload` instead of the default message body.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_response(self) -> Response {
        let payload = match self.payload {
            Some(p) => Payload::from(p),
            None => Payload::value(ErrorMessage { message: self.message }),
        };
        Response::new(payload).with_status(self.status)
    }
}

/// Translate any error into a response.
///
/// The error and its source chain are searched for an [`ApiError`]; the first
/// one found is honoured verbatim. Otherwise the result is a 500 carrying the
/// error's display text.
pub fn error_response(err: &(dyn StdError + 'static)) -> Response {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(api) = e.downcast_ref::<ApiError>() {
            return api.clone().into_response();
        }
        current = e.source();
    }

    status_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// A `{"message": ..}` response with the given status.
pub fn status_error(status: StatusCode, message: impl Into<String>) -> Response {
    ApiError::new(status, message).into_response()
}

/// Write `value` as JSON with `status` directly to `w`.
///
/// Markup characters are not escaped. `pretty` indents with tabs.
pub fn write_json<T: Serialize + ?Sized>(
    w: &ResponseWriter,
    status: StatusCode,
    value: &T,
    pretty: bool,
) -> Result<(), serde_json::Error> {
    let mut body = Vec::new();
    if pretty {
        let mut ser = Serializer::with_formatter(&mut body, PrettyFormatter::with_indent(b"\t"));
        value.serialize(&mut ser)?;
    } else {
        serde_json::to_writer(&mut body, value)?;
    }
    body.push(b'\n');

    w.set_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    w.write_header(status);
    w.write(&body);
    Ok(())
}

/// Write `{"message": err}` with `status` directly to `w`.
pub fn write_error(w: &ResponseWriter, status: StatusCode, err: &dyn std::fmt::Display) {
    let message = ErrorMessage {
        message: err.to_string(),
    };
    if let Err(e) = write_json(w, status, &message, false) {
        tracing::error!(error = %e, "Failed to encode error response");
        w.write_header(status);
    }
}

/// Redirect the error to `url` when there is one, otherwise respond with it.
///
/// The redirect carries `error` (snake-cased status text) and
/// `error_description` query parameters. A missing status means 500.
pub fn error_redirect(url: Option<&Url>, status: Option<StatusCode>, message: impl Into<String>) -> Response {
    let status = status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = message.into();

    match url {
        Some(url) => Response::redirect(
            url,
            [
                ("error".to_string(), error_code(status)),
                ("error_description".to_string(), message),
            ],
        ),
        None => status_error(status, message),
    }
}

/// `404 Not Found` → `not_found`.
fn error_code(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("unknown").to_snake_case()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("loading widget failed")]
    struct Wrapped(#[source] ApiError);

    #[test]
    fn plain_errors_become_500() {
        let err = std::io::Error::other("disk on fire");
        let resp = error_response(&err);
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn api_errors_are_honoured_through_sources() {
        let err = Wrapped(ApiError::new(StatusCode::CONFLICT, "taken"));
        assert_eq!(error_response(&err).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn write_json_does_not_escape_markup() {
        let w = ResponseWriter::new();
        write_json(&w, StatusCode::ACCEPTED, &serde_json::json!({"html": "<b>&</b>"}), false).unwrap();
        let resp = w.take_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn write_error_uses_message_body() {
        let w = ResponseWriter::new();
        write_error(&w, StatusCode::UNAUTHORIZED, &"no token");
        assert_eq!(w.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(w.body_len(), "{\"message\":\"no token\"}\n".len());
    }

    #[test]
    fn error_codes_are_snake_case() {
        assert_eq!(error_code(StatusCode::INTERNAL_SERVER_ERROR), "internal_server_error");
        assert_eq!(error_code(StatusCode::NOT_FOUND), "not_found");
        assert_eq!(error_code(StatusCode::PAYLOAD_TOO_LARGE), "payload_too_large");
        assert_eq!(error_code(StatusCode::NON_AUTHORITATIVE_INFORMATION), "non_authoritative_information");
    }

    #[test]
    fn redirect_carries_error_parameters() {
        let url = Url::parse("https://app.example.com/login").unwrap();
        let resp = error_redirect(Some(&url), Some(StatusCode::UNAUTHORIZED), "bad token");

        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers()[header::LOCATION],
            "https://app.example.com/login?error=unauthorized&error_description=bad+token"
        );

        let resp = error_redirect(None, None, "boom");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
