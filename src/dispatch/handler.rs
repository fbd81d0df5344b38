//! Handler shapes.
//!
//! A handler's shape is fixed when it is wrapped, never inspected per
//! request:
//!
//! ```text
//! Handler::raw                  Request<Body>              -> axum Response
//! Handler::responder            RequestContext             -> impl Responder
//! Handler::new                  ()                         -> impl IntoOutcome
//! Handler::with_context         RequestContext             -> impl IntoOutcome
//! Handler::with_params          P: BindRequest             -> impl IntoOutcome
//! Handler::with_context_params  RequestContext, P          -> impl IntoOutcome
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::dispatch::binder::{BindError, BindRequest};
use crate::dispatch::context::RequestContext;
use crate::http::error::ApiError;
use crate::http::response::{Responder, Response};
use crate::BoxError;

/// What a handler produced.
pub enum Outcome {
    /// Write this response.
    Respond(Box<dyn Responder>),
    /// Translate this error into a response.
    Fail(BoxError),
    /// The handler wrote through [`RequestContext::writer`] (or wants an
    /// empty 200).
    Handled,
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Respond(r) => f.debug_tuple("Respond").field(&r.status()).finish(),
            Self::Fail(e) => f.debug_tuple("Fail").field(e).finish(),
            Self::Handled => f.write_str("Handled"),
        }
    }
}

/// Conversion of handler return values.
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Outcome {
        self
    }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Outcome {
        Outcome::Handled
    }
}

impl IntoOutcome for Response {
    fn into_outcome(self) -> Outcome {
        Outcome::Respond(Box::new(self))
    }
}

impl IntoOutcome for ApiError {
    fn into_outcome(self) -> Outcome {
        Outcome::Fail(Box::new(self))
    }
}

/// `None` writes nothing.
impl<T: IntoOutcome> IntoOutcome for Option<T> {
    fn into_outcome(self) -> Outcome {
        match self {
            Some(v) => v.into_outcome(),
            None => Outcome::Handled,
        }
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: Into<BoxError>,
{
    fn into_outcome(self) -> Outcome {
        match self {
            Ok(v) => v.into_outcome(),
            Err(e) => Outcome::Fail(e.into()),
        }
    }
}

pub(crate) type RawFn = Arc<dyn Fn(Request<Body>) -> BoxFuture<'static, axum::response::Response> + Send + Sync>;
pub(crate) type ResponderFn = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Box<dyn Responder>> + Send + Sync>;
pub(crate) type InvokeFn =
    Arc<dyn Fn(RequestContext) -> Result<BoxFuture<'static, Outcome>, BindError> + Send + Sync>;

/// A route handler with its shape resolved.
#[derive(Clone)]
pub enum Handler {
    /// Receives the request untouched and owns the response.
    Raw(RawFn),
    /// Returns something that writes itself.
    Responder(ResponderFn),
    /// Returns a value or error, optionally with context and bound parameters.
    Typed(TypedHandler),
}

#[derive(Clone)]
pub struct TypedHandler {
    pub(crate) takes_params: bool,
    pub(crate) invoke: InvokeFn,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(_) => f.write_str("Handler::Raw"),
            Self::Responder(_) => f.write_str("Handler::Responder"),
            Self::Typed(t) => f
                .debug_struct("Handler::Typed")
                .field("takes_params", &t.takes_params)
                .finish(),
        }
    }
}

fn typed<F>(takes_params: bool, invoke: F) -> Handler
where
    F: Fn(RequestContext) -> Result<BoxFuture<'static, Outcome>, BindError> + Send + Sync + 'static,
{
    Handler::Typed(TypedHandler {
        takes_params,
        invoke: Arc::new(invoke),
    })
}

impl Handler {
    pub fn raw<F, Fut>(f: F) -> Self
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = axum::response::Response> + Send + 'static,
    {
        Self::Raw(Arc::new(move |req| f(req).boxed()))
    }

    pub fn responder<F, Fut, R>(f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Responder + 'static,
    {
        Self::Responder(Arc::new(move |ctx| {
            let fut = f(ctx);
            async move { Box::new(fut.await) as Box<dyn Responder> }.boxed()
        }))
    }

    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
    {
        typed(false, move |_ctx| {
            let fut = f();
            Ok(async move { fut.await.into_outcome() }.boxed())
        })
    }

    pub fn with_context<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
    {
        typed(false, move |ctx| {
            let fut = f(ctx);
            Ok(async move { fut.await.into_outcome() }.boxed())
        })
    }

    /// The request body is read and bound into `P` before `f` runs.
    pub fn with_params<F, Fut, P>(f: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
        P: BindRequest,
    {
        typed(true, move |ctx| {
            let params = P::bind_request(&ctx.input())?;
            let fut = f(params);
            Ok(async move { fut.await.into_outcome() }.boxed())
        })
    }

    pub fn with_context_params<F, Fut, P>(f: F) -> Self
    where
        F: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
        P: BindRequest,
    {
        typed(true, move |ctx| {
            let params = P::bind_request(&ctx.input())?;
            let fut = f(ctx, params);
            Ok(async move { fut.await.into_outcome() }.boxed())
        })
    }

    /// Whether the body is read and bound before the handler runs.
    pub fn takes_params(&self) -> bool {
        matches!(self, Self::Typed(t) if t.takes_params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn result_errors_fail() {
        let r: Result<Response, std::io::Error> = Err(std::io::Error::other("nope"));
        assert!(matches!(r.into_outcome(), Outcome::Fail(_)));
    }

    #[test]
    fn unit_and_none_are_handled() {
        assert!(matches!(().into_outcome(), Outcome::Handled));
        assert!(matches!(None::<Response>.into_outcome(), Outcome::Handled));
    }

    #[test]
    fn responses_respond() {
        let outcome = Ok::<_, ApiError>(Response::empty().with_status(StatusCode::CREATED)).into_outcome();
        match outcome {
            Outcome::Respond(r) => assert_eq!(r.status(), StatusCode::CREATED),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn shapes_are_fixed_at_wrap_time() {
        assert!(!Handler::new(|| async {}).takes_params());
        assert!(Handler::with_params(|_: crate::dispatch::Params<serde_json::Value>| async {}).takes_params());
        assert!(!Handler::raw(|_req| async { axum::response::Response::default() }).takes_params());
    }
}
