//! Request logging and last-resort panic containment.

use std::backtrace::Backtrace;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;
use tracing::{Instrument, Span};

use crate::dispatch::route::panic_message;
use crate::http::error::write_error;
use crate::http::request::X_REQUEST_ID;
use crate::http::writer::ResponseWriter;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Log one debug line per request once the response is ready.
///
/// A panic escaping the inner service is logged as fatal and answered with
/// a generic 500 error body; the server keeps running.
pub async fn request_log(State(log): State<Span>, req: Request<Body>, next: Next) -> Response {
    let span = log.clone();
    async move {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let remote = remote_addr(&req);
        let user_agent = header_str(req.headers(), header::USER_AGENT.as_str());
        let request_id = header_str(req.headers(), X_REQUEST_ID);

        let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                tracing::error!(
                    fatal = true,
                    panic = %panic_message(&*panic),
                    trace = %Backtrace::force_capture(),
                    request_id = %request_id,
                    "Fatal http error"
                );
                let w = ResponseWriter::new();
                write_error(&w, StatusCode::INTERNAL_SERVER_ERROR, &"internal server error");
                return w.take_response();
            }
        };

        tracing::debug!(
            status = response.status().as_u16(),
            remote = %remote,
            headers = ?response.headers(),
            user_agent = %user_agent,
            dur = ?start.elapsed(),
            request_id = %request_id,
            "{} {}",
            method,
            path
        );

        response
    }
    .instrument(span)
    .await
}

/// `X-Forwarded-For` when present, else the peer address.
fn remote_addr(req: &Request<Body>) -> String {
    if let Some(forwarded) = req.headers().get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        return forwarded.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
