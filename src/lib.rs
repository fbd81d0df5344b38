//! Routing and dispatch helpers for versioned JSON APIs.

pub mod config;
pub mod dispatch;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod security;

/// Error type handlers may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::schema::ServerConfig;
pub use dispatch::{Handler, Params, RequestContext, RouteOptions};
pub use http::{ApiError, Response, Server};
pub use lifecycle::Shutdown;
