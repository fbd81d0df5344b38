//! Configuration schema definitions.
//!
//! Everything the server needs that can be expressed as plain data lives in
//! [`ServerConfig`]. Listeners, routers, log spans and authorizers are not
//! serialisable and are supplied through [`crate::http::ServerBuilder`].

use serde::{Deserialize, Serialize};

/// Root configuration for the API server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:9000").
    pub addr: String,

    /// Path prefix every API route is registered under.
    pub base_path: String,

    /// Display name used in the `Server` response header.
    pub name: String,

    /// Highest API version this server implements.
    pub version: String,

    /// Version reported in the `Server` header. Defaults to `version`.
    pub server_version: Option<String>,

    /// Enforce the `{version}` path segment.
    pub versioning: bool,

    /// Maximum request body size in bytes buffered for parameter binding.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9000".to_string(),
            base_path: "/api/{version}".to_string(),
            name: "Atomic".to_string(),
            version: "1.0.0".to_string(),
            server_version: None,
            versioning: false,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl ServerConfig {
    /// Enable versioning with the given API version.
    pub fn with_versioning(mut self, version: impl Into<String>) -> Self {
        self.versioning = true;
        self.version = version.into();
        self
    }

    /// The version advertised in the `Server` header.
    pub fn server_version(&self) -> &str {
        self.server_version.as_deref().unwrap_or(&self.version)
    }
}
