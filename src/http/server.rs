//! API server setup and lifecycle.
//!
//! # Responsibilities
//! - Register routes under the configured base path
//! - Wire up middleware (request id, version gate, request log)
//! - Bind the listener and serve until shut down
//!
//! # Layering
//! ```text
//! set request id → propagate request id → version gate → request log → dispatch
//! ```
//! Routes on the root router supplied to the builder bypass all of it.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Extensions, Method, Request},
    middleware::from_fn_with_state,
    routing::{on, MethodFilter},
    Router,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

use crate::config::{validate_config, ServerConfig, ValidationError};
use crate::dispatch::handler::Handler;
use crate::dispatch::route::{dispatch, panic_message, Route, RouteError, RouteOptions};
use crate::http::middleware::request_log::request_log;
use crate::http::middleware::version::{version_gate, RequestVersion, VersionGate};
use crate::http::request::{propagate_request_id, set_request_id};
use crate::lifecycle::Shutdown;
use crate::net::listener::{self, ListenerError, ListenerSource};
use crate::security::Authorizer;

/// Server lifecycle failure.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Config(Vec<ValidationError>),

    #[error("server is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serve task failed: {0}")]
    Task(String),

    #[error("shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    listener: Option<std::net::TcpListener>,
    router: Option<Router>,
    log: Option<Span>,
    authorizers: Vec<Arc<dyn Authorizer>>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            listener: None,
            router: None,
            log: None,
            authorizers: Vec::new(),
        }
    }

    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.config.addr = addr.into();
        self
    }

    /// Serve on an already bound listener instead of `addr`.
    pub fn listener(mut self, listener: std::net::TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.config.base_path = base_path.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Turn on the version gate; `version` is the newest version served.
    pub fn versioning(mut self, version: impl Into<String>) -> Self {
        self.config = self.config.with_versioning(version);
        self
    }

    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = Some(version.into());
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.config.max_body_size = bytes;
        self
    }

    /// Root router. Its routes are served as-is, outside the base path.
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Span every server log line is emitted under.
    pub fn log(mut self, span: Span) -> Self {
        self.log = Some(span);
        self
    }

    /// Authorizer applied to every route ahead of the route's own.
    pub fn authorizer<A: Authorizer>(mut self, authorizer: A) -> Self {
        self.authorizers.push(Arc::new(authorizer));
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        validate_config(&self.config).map_err(ServerError::Config)?;

        let log = self
            .log
            .unwrap_or_else(|| tracing::info_span!("api", name = %self.config.name));
        let gate = self.config.versioning.then(|| {
            VersionGate::new(&self.config.version, &self.config.name, self.config.server_version())
        });
        let listener = ListenerSource::new(self.listener, &self.config.addr);

        Ok(Server {
            root: self.router.unwrap_or_default(),
            api: Router::new(),
            registered: HashSet::new(),
            authorizers: self.authorizers,
            gate,
            log,
            state: Mutex::new(ServeState {
                listener,
                started: false,
                running: None,
            }),
            config: self.config,
        })
    }
}

struct ServeState {
    listener: ListenerSource,
    started: bool,
    running: Option<Running>,
}

struct Running {
    shutdown: Shutdown,
    task: JoinHandle<std::io::Result<()>>,
}

/// The API server.
pub struct Server {
    config: ServerConfig,
    root: Router,
    api: Router,
    registered: HashSet<(Method, String)>,
    authorizers: Vec<Arc<dyn Authorizer>>,
    gate: Option<VersionGate>,
    log: Span,
    state: Mutex<ServeState>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new(ServerConfig::default())
    }

    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        ServerBuilder::new(config).build()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn log(&self) -> &Span {
        &self.log
    }

    /// Register `handler` at `base_path + path`.
    pub fn add_route(&mut self, path: &str, handler: Handler, options: RouteOptions) -> Result<(), RouteError> {
        if self.state.get_mut().started {
            return Err(RouteError::Frozen);
        }
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath(path.to_string()));
        }

        let full_path = format!("{}{}", self.config.base_path, path);
        let key = (options.method.clone(), full_path.clone());
        if self.registered.contains(&key) {
            return Err(RouteError::Duplicate {
                method: key.0,
                path: key.1,
            });
        }

        let filter = MethodFilter::try_from(options.method.clone())
            .map_err(|_| RouteError::UnsupportedMethod(options.method.clone()))?;

        let mut authorizers = self.authorizers.clone();
        authorizers.extend(options.authorizers);
        let route = Arc::new(Route {
            handler,
            authorizers,
            scopes: options.scopes,
            context_fn: options.context_fn,
            max_body_size: self.config.max_body_size,
            version: self.config.version.clone(),
            log: self.log.clone(),
        });

        let method_router = on(filter, move |req: Request<Body>| dispatch(route.clone(), req));

        // The router rejects conflicting placeholder layouts by panicking.
        let api = self.api.clone();
        let registered = std::panic::catch_unwind(AssertUnwindSafe(|| api.route(&full_path, method_router)));
        match registered {
            Ok(api) => self.api = api,
            Err(panic) => {
                return Err(RouteError::Conflict {
                    path: full_path,
                    reason: panic_message(&*panic),
                })
            }
        }

        tracing::debug!(parent: &self.log, method = %key.0, path = %key.1, "Route registered");
        self.registered.insert(key);
        Ok(())
    }

    /// The complete service: root router plus the layered API routes.
    pub fn handler(&self) -> Router {
        if self.registered.is_empty() {
            return self.root.clone();
        }

        let mut api = self
            .api
            .clone()
            .route_layer(from_fn_with_state(self.log.clone(), request_log));
        if let Some(gate) = &self.gate {
            api = api.route_layer(from_fn_with_state(gate.clone(), version_gate));
        }
        let api = api.route_layer(propagate_request_id()).route_layer(set_request_id());

        self.root.clone().merge(api)
    }

    /// Start serving in the background and return the bound address.
    ///
    /// Routes can no longer be added once this has been called.
    pub async fn serve(&self) -> Result<SocketAddr, ServerError> {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = listener::bind(&mut state.listener, &self.config.addr).await?;
        let addr = listener.local_addr()?;

        let shutdown = Shutdown::new();
        let signal = shutdown.signalled();
        let app = self.handler().into_make_service_with_connect_info::<SocketAddr>();

        let task = tokio::spawn(
            async move {
                let result = axum::serve(listener, app).with_graceful_shutdown(signal).await;
                match &result {
                    Ok(()) => tracing::debug!("Server stopped"),
                    Err(e) => tracing::error!(error = %e, "Server failed"),
                }
                result
            }
            .instrument(self.log.clone()),
        );

        tracing::debug!(parent: &self.log, address = %addr, "Server listening");
        state.started = true;
        state.running = Some(Running { shutdown, task });
        Ok(addr)
    }

    /// Stop accepting connections and wait up to `grace` for in-flight
    /// requests to finish.
    ///
    /// # Panics
    /// If the server is not running.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ServerError> {
        let running = self.state.lock().await.running.take();
        let Some(mut running) = running else {
            tracing::error!(parent: &self.log, "Server already shut down");
            panic!("server already shut down");
        };

        running.shutdown.trigger();
        match tokio::time::timeout(grace, &mut running.task).await {
            Ok(Ok(result)) => result.map_err(ServerError::Io),
            Ok(Err(join)) => Err(ServerError::Task(join.to_string())),
            Err(_) => {
                running.task.abort();
                Err(ServerError::ShutdownTimeout(grace))
            }
        }
    }

    /// Whether [`serve`](Self::serve) is active.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running.is_some()
    }

    /// The version a request was accepted under, or the server's version.
    pub fn request_version(&self, extensions: &Extensions) -> String {
        match extensions.get::<RequestVersion>() {
            Some(v) => v.to_string(),
            None => self.config.version.clone(),
        }
    }
}
