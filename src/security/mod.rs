//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Matched API request:
//!     → authorizer.rs (route authorizers, in declared order)
//!         first failure → 401 {"message": ...}, handler never runs
//!         AuthContext   → merged into request extensions
//!     → Pass to parameter binding
//! ```
//!
//! # Design Decisions
//! - Fail closed: any authorizer error denies the request
//! - No business authentication here; authorizers are pluggable

pub mod authorizer;

pub use authorizer::{from_fn, AuthContext, AuthError, AuthResult, Authorizer, BearerTokens, Grant};
