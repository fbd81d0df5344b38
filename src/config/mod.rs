//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! ServerConfig (defaults, or deserialized by the embedding application)
//!     → validation.rs (semantic checks)
//!     → ServerBuilder::build (fails on any validation error)
//!     → immutable for the server's lifetime
//! ```
//!
//! # Design Decisions
//! - The library never reads files or environment variables itself
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod schema;
pub mod validation;

pub use schema::ServerConfig;
pub use validation::{validate_config, ValidationError};
