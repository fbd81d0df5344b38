//! Request dispatch.
//!
//! Turns a matched request into a handler call: authorizers, parameter
//! binding, panic containment and response writing all happen here.
//!
//! # Example
//! ```no_run
//! use atomic_api::dispatch::{Handler, Params, RouteOptions};
//! use atomic_api::http::{Response, Server};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize, Serialize)]
//! struct Widget {
//!     id: u64,
//!     name: String,
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = Server::builder().build()?;
//! server.add_route(
//!     "/widgets",
//!     Handler::with_params(|Params(w): Params<Widget>| async move {
//!         Response::json(w).with_status(axum::http::StatusCode::CREATED)
//!     }),
//!     RouteOptions::post(),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod context;
pub mod decode;
pub mod handler;
pub mod route;

pub use binder::{bind_structural, BindError, BindRequest, Params, RequestInput};
pub use context::RequestContext;
pub use decode::Source;
pub use handler::{Handler, IntoOutcome, Outcome};
pub use route::{DispatchError, RouteError, RouteOptions};
