//! Dual-stack HTTP server.
//!
//! # Responsibilities
//! - Build the shared handler context (parser limits, cache, document root)
//! - Run one listener task per enabled address family
//! - Run the accept loop, spawning one task per accepted connection
//! - Stop accepting on shutdown; report listener setup failures
//!
//! # Design Decisions
//! - Both families share one response cache and one connection tracker
//! - A family whose socket cannot be set up logs CRIT and ends its own task
//!   only; the sibling family keeps serving
//! - Accept errors on a live listener are logged and retried after a short
//!   back-off (e.g. EMFILE), never fatal

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};

use crate::config::{ListenerConfig, ServerConfig};
use crate::lifecycle::Shutdown;
use crate::net::connection::{Connection, ConnectionTracker, HandlerContext};
use crate::net::listener::{AddressFamily, Listener, ListenerError};
use crate::observability::logging::{log, Severity};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Why a listener task ended with an error.
#[derive(Debug)]
pub enum ListenerFailure {
    /// Socket, bind or listen failed.
    Setup(AddressFamily, ListenerError),
    /// The listener task panicked.
    Panicked(JoinError),
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerFailure::Setup(family, e) => write!(f, "{}: {}", family, e),
            ListenerFailure::Panicked(e) => write!(f, "listener task panicked: {}", e),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no address family enabled")]
    NoListeners,

    #[error("listener failure: {}", join_failures(.0))]
    ListenersFailed(Vec<ListenerFailure>),
}

fn join_failures(failures: &[ListenerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The server: shared state plus the listener orchestration.
#[derive(Clone)]
pub struct HttpServer {
    config: Arc<ServerConfig>,
    context: Arc<HandlerContext>,
    tracker: ConnectionTracker,
    bound: Arc<DashMap<AddressFamily, SocketAddr>>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let context = Arc::new(HandlerContext::from_config(&config));
        Self {
            config,
            context,
            tracker: ConnectionTracker::new(),
            bound: Arc::new(DashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Address `family`'s listener is bound to, once it is listening.
    pub fn local_addr(&self, family: AddressFamily) -> Option<SocketAddr> {
        self.bound.get(&family).map(|addr| *addr)
    }

    /// Run every enabled listener until shutdown.
    ///
    /// Returns once all listener tasks have ended; an error if any of them
    /// failed to start.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), ServerError> {
        let listeners = &self.config.listeners;
        let families = [
            (AddressFamily::Ipv4, &listeners.ipv4),
            (AddressFamily::Ipv6, &listeners.ipv6),
        ];

        let mut tasks = JoinSet::new();
        for (family, listener_config) in families {
            if !listener_config.enabled {
                continue;
            }
            let server = self.clone();
            let listener_config = listener_config.clone();
            let rx = shutdown.subscribe();
            tasks.spawn(async move { server.run_listener(family, listener_config, rx).await });
        }

        if tasks.is_empty() {
            return Err(ServerError::NoListeners);
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err((family, e))) => failures.push(ListenerFailure::Setup(family, e)),
                Err(e) => {
                    tracing::error!(error = %e, "Listener task aborted");
                    failures.push(ListenerFailure::Panicked(e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ServerError::ListenersFailed(failures))
        }
    }

    async fn run_listener(
        &self,
        family: AddressFamily,
        config: ListenerConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), (AddressFamily, ListenerError)> {
        let listeners = &self.config.listeners;
        let listener =
            match Listener::bind(family, &config, listeners.backlog, listeners.max_connections).await {
                Ok(listener) => listener,
                Err(e) => {
                    log(Severity::Crit, family.as_str(), &e.to_string());
                    return Err((family, e));
                }
            };

        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept connections on `listener` until `shutdown` fires.
    pub async fn serve(&self, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        let family = listener.family();
        if let Ok(addr) = listener.local_addr() {
            self.bound.insert(family, addr);
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(source = family.as_str(), "Listener stopping");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer, permit)) => {
                            let context = Arc::clone(&self.context);
                            let guard = self.tracker.track();
                            tokio::spawn(async move {
                                let connection = Connection::new(guard.id(), stream).with_peer(peer);
                                connection.run(&context).await;
                                drop(permit);
                                drop(guard);
                            });
                        }
                        Err(e) => {
                            log(Severity::Error, family.as_str(), &e.to_string());
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        self.bound.remove(&family);
    }
}
