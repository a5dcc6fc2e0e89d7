//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Drive one accepted connection end to end:
//!   read → parse → cache lookup → build → write → close
//! - Translate internal failures into an error response (protocol-level)
//!   or a silent teardown (transport-level)
//! - Generate unique connection IDs for tracing
//! - Track live connections so shutdown can drain them
//!
//! # Data Flow
//! ```text
//! AwaitingRequest --bytes--> Parsing --ok--> CacheLookup --hit--> Writing
//!                                                       --miss-> Building --> Writing
//!                            Parsing --malformed/stalled--> Building --> Writing
//! Writing --done--> Closed
//! any transport failure --> Failed
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Notify;

use crate::cache::{CacheKey, Lookup, ResponseCache};
use crate::config::ServerConfig;
use crate::content::DocumentRoot;
use crate::http::parser::{ParseError, RequestParser};
use crate::http::request::{Request, Version};
use crate::http::response::{self, Response};
use crate::http::status::StatusCode;

/// Most unread request bytes discarded before closing after an error response.
const LINGER_BYTES: usize = 64 * 1024;

/// Longest wait for the peer to finish sending after an error response.
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingRequest,
    Parsing,
    CacheLookup,
    Building,
    Writing,
    Closed,
    Failed,
}

/// Shared, read-only collaborators of every connection handler.
pub struct HandlerContext {
    parser: RequestParser,
    cache: Option<Arc<ResponseCache>>,
    root: DocumentRoot,
    idle_timeout: Duration,
    write_timeout: Duration,
}

impl HandlerContext {
    pub fn new(
        parser: RequestParser,
        cache: Option<Arc<ResponseCache>>,
        root: DocumentRoot,
        idle_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            parser: parser.with_idle_timeout(idle_timeout),
            cache,
            root,
            idle_timeout,
            write_timeout,
        }
    }

    /// Context for `config`, with a fresh cache if caching is enabled.
    pub fn from_config(config: &ServerConfig) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(ResponseCache::from_config(&config.cache)));
        Self::new(
            RequestParser::new(config.limits),
            cache,
            DocumentRoot::new(config.target.clone()),
            config.timeouts.idle_read(),
            config.timeouts.write(),
        )
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    async fn build(&self, request: &Request) -> Response {
        let resolved = self.root.resolve(request).await;
        response::build(request, resolved.status, resolved.payload, Utc::now())
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Status of the response written, if any.
    pub status: Option<StatusCode>,
    /// `Closed` or `Failed`.
    pub state: ConnectionState,
}

/// One accepted connection and its handler state.
pub struct Connection<S> {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    stream: BufReader<S>,
    state: ConnectionState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: ConnectionId, stream: S) -> Self {
        Self {
            id,
            peer: None,
            stream: BufReader::new(stream),
            state: ConnectionState::AwaitingRequest,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(
            connection_id = %self.id,
            from = ?self.state,
            to = ?next,
            "Connection state change"
        );
        self.state = next;
    }

    /// Serve exactly one request, then close.
    pub async fn run(mut self, ctx: &HandlerContext) -> Outcome {
        let first_read = tokio::time::timeout(ctx.idle_timeout, self.stream.fill_buf())
            .await
            .map(|read| read.map(|buf| !buf.is_empty()));
        match first_read {
            Ok(Ok(false)) => return self.finish(ConnectionState::Closed, None),
            Ok(Ok(true)) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Read failed");
                return self.finish(ConnectionState::Failed, None);
            }
            Err(_) => {
                tracing::debug!(connection_id = %self.id, "Idle connection closed");
                return self.finish(ConnectionState::Closed, None);
            }
        }

        self.transition(ConnectionState::Parsing);
        // error responses may leave part of the request unread
        let mut linger = true;
        let response = match ctx.parser.read_request(&mut self.stream).await {
            Ok(request) => {
                linger = false;
                self.respond(ctx, &request).await
            }
            Err(ParseError::Malformed(err)) => {
                tracing::debug!(connection_id = %self.id, error = %err, "Malformed request");
                self.error_response(err.status())
            }
            Err(ParseError::Timeout { received }) => {
                tracing::debug!(connection_id = %self.id, received, "Request read timed out");
                self.error_response(StatusCode::REQUEST_TIMEOUT)
            }
            Err(ParseError::Incomplete { received }) => {
                tracing::debug!(connection_id = %self.id, received, "Peer closed mid-request");
                return self.finish(ConnectionState::Failed, None);
            }
            Err(ParseError::Transport(e)) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Read failed");
                return self.finish(ConnectionState::Failed, None);
            }
        };

        self.transition(ConnectionState::Writing);
        let status = response.status();
        let write = async {
            let stream = self.stream.get_mut();
            response.write_to(stream).await?;
            stream.shutdown().await
        };
        match tokio::time::timeout(ctx.write_timeout, write).await {
            Ok(Ok(())) => {
                if linger {
                    self.discard_input().await;
                }
                self.finish(ConnectionState::Closed, Some(status))
            }
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Write failed");
                self.finish(ConnectionState::Failed, None)
            }
            Err(_) => {
                tracing::debug!(connection_id = %self.id, "Write timed out");
                self.finish(ConnectionState::Failed, None)
            }
        }
    }

    async fn respond(&mut self, ctx: &HandlerContext, request: &Request) -> Arc<Response> {
        let cached = ctx.cache.as_ref().zip(CacheKey::for_request(request));
        let response = match cached {
            Some((cache, key)) => {
                self.transition(ConnectionState::CacheLookup);
                let (response, lookup) = cache.get_or_build(key, || ctx.build(request)).await;
                if lookup != Lookup::Hit {
                    self.transition(ConnectionState::Building);
                }
                tracing::trace!(connection_id = %self.id, lookup = ?lookup, "Cache lookup");
                response
            }
            None => {
                self.transition(ConnectionState::Building);
                Arc::new(ctx.build(request).await)
            }
        };

        tracing::info!(
            connection_id = %self.id,
            peer = ?self.peer,
            method = %request.method(),
            target = request.target(),
            version = request.version().as_str(),
            status = response.status().as_u16(),
            "Request served"
        );
        response
    }

    /// Read and drop what the peer is still sending, so closing the socket
    /// does not reset the connection before the response is read.
    async fn discard_input(&mut self) {
        let mut buf = [0u8; 1024];
        let mut discarded = 0;
        let drain = async {
            while discarded < LINGER_BYTES {
                match self.stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => discarded += n,
                }
            }
        };
        // the peer may simply never close; the deadline ends the wait
        let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
        tracing::trace!(connection_id = %self.id, discarded, "Lingering close done");
    }

    fn error_response(&mut self, status: StatusCode) -> Arc<Response> {
        self.transition(ConnectionState::Building);
        Arc::new(response::build_error(Version::Http11, status, Utc::now()))
    }

    fn finish(&mut self, state: ConnectionState, status: Option<StatusCode>) -> Outcome {
        self.transition(state);
        Outcome { status, state }
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    idle: Notify,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until every tracked connection has closed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait for connections to drain, giving up after `limit`.
    /// Returns whether everything closed in time.
    pub async fn drain(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait_idle()).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
