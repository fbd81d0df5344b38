//! Route authorization.
//!
//! Authorizers run in declared order before any parameter binding. Each one
//! may hand back an [`AuthContext`]; its values are merged into the request
//! extensions so later authorizers and the handler can read them by type.

use std::collections::HashMap;
use std::future::Future;

use axum::http::{header, request::Parts, Extensions};
use futures_util::future::{self, BoxFuture, FutureExt};
use thiserror::Error;

use crate::BoxError;

/// Failure reported by an authorizer. Both variants end the request with 401.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The caller is known not to be allowed.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// The authorizer could not reach a decision.
    #[error("authorization failed: {0}")]
    Failed(#[source] BoxError),
}

/// Values an authorizer attaches to the request.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    extensions: Extensions,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a value, replacing any earlier value of the same type.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    pub(crate) fn merge_into(self, extensions: &mut Extensions) {
        extensions.extend(self.extensions);
    }
}

pub type AuthResult = Result<Option<AuthContext>, AuthError>;

/// A pluggable request gatekeeper.
///
/// `scopes` are the permissions the route declared with
/// [`RouteOptions::scopes`](crate::dispatch::RouteOptions::scopes); authorizers
/// that do not work with scopes ignore them. The returned future may do I/O
/// (token introspection, session lookups) without blocking the runtime.
pub trait Authorizer: Send + Sync + 'static {
    fn authorize<'a>(&'a self, request: &'a Parts, scopes: &'a [String]) -> BoxFuture<'a, AuthResult>;
}

/// Authorizer backed by an async closure.
pub struct FnAuthorizer<F>(F);

impl<F, Fut> Authorizer for FnAuthorizer<F>
where
    F: Fn(&Parts, &[String]) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AuthResult> + Send + 'static,
{
    fn authorize<'a>(&'a self, request: &'a Parts, scopes: &'a [String]) -> BoxFuture<'a, AuthResult> {
        (self.0)(request, scopes).boxed()
    }
}

/// Wrap an async closure as an [`Authorizer`].
///
/// The closure sees the request head synchronously and returns a future that
/// owns whatever it needs from it.
pub fn from_fn<F, Fut>(f: F) -> FnAuthorizer<F>
where
    F: Fn(&Parts, &[String]) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AuthResult> + Send + 'static,
{
    FnAuthorizer(f)
}

/// Identity established by [`BearerTokens`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub subject: String,
    pub scopes: Vec<String>,
}

/// Static bearer-token authorizer with per-token scopes.
#[derive(Debug, Clone, Default)]
pub struct BearerTokens {
    tokens: HashMap<String, Grant>,
}

impl BearerTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token<I, S>(mut self, token: impl Into<String>, subject: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.insert(
            token.into(),
            Grant {
                subject: subject.into(),
                scopes: scopes.into_iter().map(Into::into).collect(),
            },
        );
        self
    }
}

impl BearerTokens {
    fn check(&self, request: &Parts, scopes: &[String]) -> AuthResult {
        let token = request
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or_else(|| AuthError::AccessDenied("missing bearer token".into()))?;

        let grant = self
            .tokens
            .get(token)
            .ok_or_else(|| AuthError::AccessDenied("unknown bearer token".into()))?;

        if let Some(missing) = scopes.iter().find(|s| !grant.scopes.contains(s)) {
            return Err(AuthError::AccessDenied(format!("missing scope {missing}")));
        }

        Ok(Some(AuthContext::new().with(grant.clone())))
    }
}

impl Authorizer for BearerTokens {
    fn authorize<'a>(&'a self, request: &'a Parts, scopes: &'a [String]) -> BoxFuture<'a, AuthResult> {
        future::ready(self.check(request, scopes)).boxed()
    }
}
