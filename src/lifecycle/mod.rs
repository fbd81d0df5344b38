//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Serve:
//!     lock state → resolve listener → spawn axum::serve → record running
//!
//! Shutdown:
//!     lock state → trigger signal → drain in-flight requests → clear running
//! ```
//!
//! # Design Decisions
//! - Start/stop transitions are serialised by one mutex
//! - Double serve is an error; shutdown of a stopped server is a panic

pub mod shutdown;

pub use shutdown::Shutdown;
