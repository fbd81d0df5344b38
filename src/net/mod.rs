//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Server::serve
//!     → listener.rs (pre-bound listener, else bind configured address)
//!     → axum::serve (one task per connection)
//! ```

pub mod listener;

pub use listener::{ListenerError, ListenerSource};
