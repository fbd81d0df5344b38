//! Configuration validation.
//!
//! Serde handles the syntax; this module checks the values make sense
//! together. All problems are reported, not just the first one.
//!
//! An unparsable `version` is deliberately not a validation error: the
//! version gate degrades it to `0.0.0`.

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::net::listener::listen_target;

/// A single semantic problem with a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid listen address {0:?}")]
    InvalidAddr(String),

    #[error("base path {0:?} must start with '/' and must not end with '/'")]
    InvalidBasePath(String),

    #[error("versioning requires a {{version}} segment in base path {0:?}")]
    MissingVersionSegment(String),

    #[error("max_body_size must be greater than zero")]
    ZeroBodyLimit,
}

/// Validate a configuration. An empty `addr` is accepted here because a
/// pre-bound listener may be supplied instead.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.addr.is_empty() && listen_target(&config.addr).is_none() {
        errors.push(ValidationError::InvalidAddr(config.addr.clone()));
    }

    let base = &config.base_path;
    if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
        errors.push(ValidationError::InvalidBasePath(base.clone()));
    }

    if config.versioning && !base.contains("{version}") {
        errors.push(ValidationError::MissingVersionSegment(base.clone()));
    }

    if config.max_body_size == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn empty_base_path_is_allowed() {
        let config = ServerConfig {
            base_path: String::new(),
            ..ServerConfig::default()
        };
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn host_names_and_empty_hosts_are_valid() {
        for addr in ["localhost:9000", ":9000", "[::1]:9000"] {
            let config = ServerConfig {
                addr: addr.into(),
                ..ServerConfig::default()
            };
            assert_eq!(validate_config(&config), Ok(()), "{addr}");
        }
    }

    #[test]
    fn reports_every_problem() {
        let config = ServerConfig {
            addr: "not an address".into(),
            base_path: "api/".into(),
            versioning: true,
            max_body_size: 0,
            ..ServerConfig::default()
        };

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::InvalidAddr("not an address".into()),
                ValidationError::InvalidBasePath("api/".into()),
                ValidationError::MissingVersionSegment("api/".into()),
                ValidationError::ZeroBodyLimit,
            ]
        );
    }
}
