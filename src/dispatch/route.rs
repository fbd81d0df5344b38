//! Route registration options and the per-request pipeline.
//!
//! # Dispatch order
//! ```text
//! authorize (declared order, first failure → 401)
//!   → context hook
//!   → path placeholders
//!   → read + bind body (param handlers only, failure → 400)
//!   → handler (panics contained → 500)
//!   → write response / translate error
//! ```

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, RawPathParams};
use axum::http::{request::Parts, Extensions, HeaderMap, Method, Request, StatusCode};
use futures_util::FutureExt;
use thiserror::Error;
use tracing::{Instrument, Span};

use crate::dispatch::binder::BindError;
use crate::dispatch::context::RequestContext;
use crate::dispatch::handler::{Handler, Outcome};
use crate::http::error::{error_response, write_error};
use crate::http::response::Responder;
use crate::http::writer::ResponseWriter;
use crate::security::{AuthError, Authorizer};

/// Registration failure.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route {method} {path} is already registered")]
    Duplicate { method: Method, path: String },

    #[error("route path {0:?} must start with '/'")]
    InvalidPath(String),

    #[error("method {0} cannot be routed")]
    UnsupportedMethod(Method),

    #[error("route {path} conflicts with an existing route: {reason}")]
    Conflict { path: String, reason: String },

    #[error("routes cannot be added after the server has started")]
    Frozen,
}

type ContextFn = Arc<dyn Fn(&mut Extensions) + Send + Sync>;

/// Per-route settings.
#[derive(Clone, Default)]
pub struct RouteOptions {
    pub(crate) method: Method,
    pub(crate) authorizers: Vec<Arc<dyn Authorizer>>,
    pub(crate) scopes: Vec<String>,
    pub(crate) context_fn: Option<ContextFn>,
}

impl fmt::Debug for RouteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteOptions")
            .field("method", &self.method)
            .field("authorizers", &self.authorizers.len())
            .field("scopes", &self.scopes)
            .field("context_fn", &self.context_fn.is_some())
            .finish()
    }
}

impl RouteOptions {
    /// `GET`, no authorizers beyond the server defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get() -> Self {
        Self::new().method(Method::GET)
    }

    pub fn post() -> Self {
        Self::new().method(Method::POST)
    }

    pub fn put() -> Self {
        Self::new().method(Method::PUT)
    }

    pub fn patch() -> Self {
        Self::new().method(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new().method(Method::DELETE)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add an authorizer. Authorizers run in the order they were added,
    /// after the server-wide defaults.
    pub fn authorizer<A: Authorizer>(mut self, authorizer: A) -> Self {
        self.authorizers.push(Arc::new(authorizer));
        self
    }

    pub fn shared_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizers.push(authorizer);
        self
    }

    /// Permissions handed to every authorizer of this route.
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Hook that may attach values to the request after authorization.
    pub fn context_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Extensions) + Send + Sync + 'static,
    {
        self.context_fn = Some(Arc::new(f));
        self
    }
}

/// Request-level failure raised before or around the handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Bind(_) => StatusCode::BAD_REQUEST,
            Self::Panicked(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text sent to the client. Panic details stay in the log.
    fn client_message(&self) -> String {
        match self {
            Self::Panicked(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// A registered route, shared by every request it serves.
pub(crate) struct Route {
    pub handler: Handler,
    pub authorizers: Vec<Arc<dyn Authorizer>>,
    pub scopes: Vec<String>,
    pub context_fn: Option<ContextFn>,
    pub max_body_size: usize,
    pub version: String,
    pub log: Span,
}

enum Invocation {
    /// Raw handler output, passed through untouched.
    Direct(axum::response::Response),
    Outcome(Outcome),
}

/// Serve one request on `route`.
pub(crate) async fn dispatch(route: Arc<Route>, req: Request<Body>) -> axum::response::Response {
    let span = route.log.clone();
    async move {
        let writer = ResponseWriter::new();
        let (parts, body) = req.into_parts();
        let request_headers = parts.headers.clone();

        match run(&route, parts, body, &writer).await {
            Ok(Invocation::Direct(response)) => return response,
            Ok(Invocation::Outcome(outcome)) => finish(outcome, &writer, &request_headers),
            Err(e) => {
                if !matches!(e, DispatchError::Panicked(_)) {
                    tracing::error!(error = %e, status = e.status().as_u16(), "Request rejected");
                }
                write_error(&writer, e.status(), &e.client_message());
            }
        }

        writer.take_response()
    }
    .instrument(span)
    .await
}

async fn run(
    route: &Route,
    mut parts: Parts,
    body: Body,
    writer: &ResponseWriter,
) -> Result<Invocation, DispatchError> {
    for authorizer in &route.authorizers {
        if let Some(ctx) = authorizer.authorize(&parts, &route.scopes).await? {
            ctx.merge_into(&mut parts.extensions);
        }
    }

    if let Some(f) = &route.context_fn {
        f(&mut parts.extensions);
    }

    match &route.handler {
        Handler::Raw(f) => {
            let req = Request::from_parts(parts, body);
            let response = contain(f(req)).await?;
            Ok(Invocation::Direct(response))
        }
        Handler::Responder(f) => {
            let ctx = context(route, parts, writer).await?.with_stream(body);
            let responder = contain(f(ctx)).await?;
            Ok(Invocation::Outcome(Outcome::Respond(responder)))
        }
        Handler::Typed(typed) => {
            let ctx = context(route, parts, writer).await?;
            let ctx = if typed.takes_params {
                let bytes = axum::body::to_bytes(body, route.max_body_size)
                    .await
                    .map_err(|e| BindError::Read(e.to_string()))?;
                ctx.with_buffered(bytes)
            } else {
                ctx.with_stream(body)
            };

            let invoke = typed.invoke.clone();
            let outcome = contain(async move {
                match invoke(ctx) {
                    Ok(fut) => Ok(fut.await),
                    Err(e) => Err(e),
                }
            })
            .await??;
            Ok(Invocation::Outcome(outcome))
        }
    }
}

async fn context(route: &Route, mut parts: Parts, writer: &ResponseWriter) -> Result<RequestContext, DispatchError> {
    let path = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        Err(e) if e.status() == StatusCode::BAD_REQUEST => {
            return Err(BindError::Invalid(e.body_text()).into());
        }
        // No placeholders on this route.
        Err(_) => Vec::new(),
    };

    Ok(RequestContext::new(
        parts,
        path,
        writer.clone(),
        route.log.clone(),
        route.version.clone(),
    ))
}

/// Run `fut`, turning a panic into [`DispatchError::Panicked`].
async fn contain<F: std::future::Future>(fut: F) -> Result<F::Output, DispatchError> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(|panic| {
        let message = panic_message(&*panic);
        tracing::error!(
            fatal = true,
            panic = %message,
            trace = %Backtrace::force_capture(),
            "Handler panicked"
        );
        DispatchError::Panicked(message)
    })
}

fn finish(outcome: Outcome, writer: &ResponseWriter, request_headers: &HeaderMap) {
    let mut responder: Box<dyn Responder> = match outcome {
        Outcome::Handled => return,
        Outcome::Respond(r) => r,
        Outcome::Fail(e) => {
            tracing::error!(error = %e, "Handler failed");
            Box::new(error_response(&*e))
        }
    };

    if let Err(e) = responder.write(writer, request_headers) {
        tracing::error!(error = %e, "Failed to write response");
        writer.reset();
        write_error(writer, StatusCode::INTERNAL_SERVER_ERROR, &e);
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_get() {
        let opts = RouteOptions::new().scopes(["read"]);
        assert_eq!(opts.method, Method::GET);
        assert_eq!(opts.scopes, vec!["read".to_string()]);
        assert_eq!(RouteOptions::post().method, Method::POST);
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[test]
    fn dispatch_errors_map_status() {
        assert_eq!(
            DispatchError::from(AuthError::AccessDenied("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            DispatchError::from(BindError::Invalid("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        let panicked = DispatchError::Panicked("secret".into());
        assert_eq!(panicked.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(panicked.client_message(), "internal server error");
    }
}
