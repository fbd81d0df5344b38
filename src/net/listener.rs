//! Listener resolution.
//!
//! # Responsibilities
//! - Prefer a pre-bound listener handed to the builder
//! - Otherwise bind the configured address
//! - Fail explicitly when neither is available

use thiserror::Error;
use tokio::net::TcpListener;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// No listener and no address configured.
    #[error("server address not set")]
    AddressNotSet,
    /// The configured address is not `host:port`.
    #[error("invalid listen address {addr:?}")]
    InvalidAddr { addr: String },
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),
    /// The pre-bound listener could not be handed to the runtime.
    #[error("failed to adopt listener: {0}")]
    Adopt(#[source] std::io::Error),
}

/// Where the server gets its socket from.
#[derive(Debug, Default)]
pub enum ListenerSource {
    /// A listener bound by the caller. Used at most once.
    Bound(std::net::TcpListener),
    /// An address to bind on every `serve`.
    Addr(String),
    #[default]
    Unset,
}

impl ListenerSource {
    pub fn new(listener: Option<std::net::TcpListener>, addr: &str) -> Self {
        match listener {
            Some(l) => Self::Bound(l),
            None if addr.is_empty() => Self::Unset,
            None => Self::Addr(addr.to_string()),
        }
    }
}

/// Turn a `host:port` listen address into a string the resolver accepts.
///
/// The host may be an IP literal (IPv6 in brackets), a name resolved at bind
/// time, or empty for all interfaces. Returns `None` without a valid port.
pub fn listen_target(addr: &str) -> Option<String> {
    let (host, port) = addr.rsplit_once(':')?;
    port.parse::<u16>().ok()?;

    if host.is_empty() {
        return Some(format!("0.0.0.0:{port}"));
    }
    let bracketed = host.starts_with('[') && host.ends_with(']');
    if (host.contains(':') && !bracketed) || host.chars().any(char::is_whitespace) {
        return None;
    }
    Some(addr.to_string())
}

/// Produce a tokio listener from `source`.
///
/// A pre-bound listener is consumed and `source` falls back to `fallback_addr`
/// for any later call.
pub async fn bind(source: &mut ListenerSource, fallback_addr: &str) -> Result<TcpListener, ListenerError> {
    let listener = match std::mem::replace(source, ListenerSource::new(None, fallback_addr)) {
        ListenerSource::Bound(std_listener) => {
            std_listener.set_nonblocking(true).map_err(ListenerError::Adopt)?;
            TcpListener::from_std(std_listener).map_err(ListenerError::Adopt)?
        }
        ListenerSource::Addr(addr) => {
            let target = listen_target(&addr).ok_or_else(|| ListenerError::InvalidAddr { addr: addr.clone() })?;
            TcpListener::bind(target.as_str()).await.map_err(ListenerError::Bind)?
        }
        ListenerSource::Unset => return Err(ListenerError::AddressNotSet),
    };

    if let Ok(local_addr) = listener.local_addr() {
        tracing::debug!(address = %local_addr, "Listener bound");
    }

    Ok(listener)
}
