//! Middleware applied to API routes.

pub mod request_log;
pub mod version;

pub use request_log::request_log;
pub use version::{parse_tolerant, version_gate, RequestVersion, VersionGate};
