//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, route registration)
//!     → request.rs (assign request id)
//!     → middleware/version.rs (gate + canonicalise version)
//!     → middleware/request_log.rs (log, contain panics)
//!     → crate::dispatch (authorize, bind, call handler)
//!     → response.rs / writer.rs (encode and buffer the reply)
//!     → Send to client
//! ```

pub mod error;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod writer;

pub use error::{error_redirect, error_response, status_error, write_error, write_json, ApiError, ErrorMessage};
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::{Encode, EncodeError, Payload, Responder, Response, StructuredValue};
pub use server::{Server, ServerBuilder, ServerError};
pub use writer::ResponseWriter;
