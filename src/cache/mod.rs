//! Response cache.
//!
//! # Responsibilities
//! - Map a cache key (method + raw target) to a previously built response
//! - Bound memory: least-recently-used eviction above `capacity` entries,
//!   optional TTL expiry
//! - Coalesce concurrent misses for one key into a single build (singleflight)
//!
//! # Design Decisions
//! - `DashMap` shards give concurrent reads and per-key serialized writes;
//!   no guard is held across an `.await`
//! - In-flight builds live in a second map of `tokio::sync::OnceCell`s; the
//!   first caller initializes the cell, everyone else awaits the same cell
//! - Responses are shared as `Arc<Response>`, so a hit never copies the body
//! - Recency is a logical clock (`AtomicU64`), bumped on every hit and insert
//!
//! # Data Flow
//! ```text
//! get_or_build(key)
//!     → entries hit?            → Hit
//!     → inflight cell for key   → first caller: build → set → Built
//!                               → others: await cell  → Coalesced
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::config::CacheConfig;
use crate::http::request::{Method, Request};
use crate::http::response::Response;

/// What identifies a cacheable response.
///
/// Content-negotiation headers are deliberately not part of the key: the
/// server produces the same bytes whatever the client accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    target: String,
}

impl CacheKey {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
        }
    }

    /// Key for `request`, or `None` if its response must not be cached.
    pub fn for_request(request: &Request) -> Option<Self> {
        match request.method() {
            Method::Get | Method::Head => Some(Self::new(request.method().clone(), request.target())),
            _ => None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

/// How `get_or_build` produced its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Served from a stored entry.
    Hit,
    /// This caller ran the build.
    Built,
    /// Another caller's in-flight build was awaited.
    Coalesced,
}

struct CacheEntry {
    response: Arc<Response>,
    inserted_at: Instant,
    last_used: AtomicU64,
}

/// Bounded, shared response cache.
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    inflight: DashMap<CacheKey, Arc<OnceCell<Arc<Response>>>>,
    capacity: usize,
    ttl: Option<Duration>,
    clock: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            capacity,
            ttl,
            clock: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.ttl
            .map(|ttl| entry.inserted_at.elapsed() >= ttl)
            .unwrap_or(false)
    }

    /// Stored response for `key`, if present and not expired.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Response>> {
        {
            let entry = self.entries.get(key)?;
            if !self.is_expired(&entry) {
                entry.last_used.store(self.tick(), Ordering::Relaxed);
                return Some(Arc::clone(&entry.response));
            }
        }
        self.entries.remove_if(key, |_, entry| self.is_expired(entry));
        None
    }

    /// Store `response` under `key`, replacing any previous entry.
    pub fn set(&self, key: CacheKey, response: Arc<Response>) {
        let entry = CacheEntry {
            response,
            inserted_at: Instant::now(),
            last_used: AtomicU64::new(self.tick()),
        };
        self.entries.insert(key, entry);

        while self.entries.len() > self.capacity {
            if !self.evict_one() {
                break;
            }
        }
    }

    /// Drop one expired entry, or else the least recently used one.
    ///
    /// Scans every entry, so a full cache pays O(capacity) per insert.
    /// Fine at the default capacity of 1024.
    fn evict_one(&self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| {
                (
                    !self.is_expired(entry.value()),
                    entry.value().last_used.load(Ordering::Relaxed),
                )
            })
            .map(|entry| entry.key().clone());

        match victim {
            Some(key) => {
                tracing::trace!(method = %key.method, target = %key.target, "Cache entry evicted");
                self.entries.remove(&key).is_some()
            }
            None => false,
        }
    }

    /// Return the cached response for `key`, building it with `build` on a miss.
    ///
    /// Concurrent callers missing on the same key share one invocation of
    /// `build` and all receive the same response. Server-error responses
    /// are handed to every waiting caller but are not stored.
    pub async fn get_or_build<F, Fut>(&self, key: CacheKey, build: F) -> (Arc<Response>, Lookup)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response>,
    {
        if let Some(hit) = self.get(&key) {
            return (hit, Lookup::Hit);
        }

        let cell = Arc::clone(self.inflight.entry(key.clone()).or_default().value());
        let ran_init = AtomicBool::new(false);
        let built = AtomicBool::new(false);

        let response = {
            let key = &key;
            let ran_init = &ran_init;
            let built = &built;
            cell.get_or_init(|| async move {
                ran_init.store(true, Ordering::Relaxed);
                // a build may have completed between the miss and the cell lookup
                if let Some(hit) = self.get(key) {
                    return hit;
                }
                built.store(true, Ordering::Relaxed);
                let response = Arc::new(build().await);
                if !response.status().is_server_error() {
                    self.set(key.clone(), Arc::clone(&response));
                }
                response
            })
            .await
        };
        let response = Arc::clone(response);

        self.inflight.remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));

        let lookup = match (ran_init.load(Ordering::Relaxed), built.load(Ordering::Relaxed)) {
            (_, true) => Lookup::Built,
            (true, false) => Lookup::Hit,
            (false, _) => Lookup::Coalesced,
        };
        (response, lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Version;
    use crate::http::response::{build, build_error, Payload};
    use crate::http::status::StatusCode;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;

    fn response(body: &str) -> Response {
        let request = Request::new(Method::Get, "/", Version::Http11);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        build(&request, StatusCode::OK, Payload::new("text/plain", body.as_bytes().to_vec()), now)
    }

    fn key(target: &str) -> CacheKey {
        CacheKey::new(Method::Get, target)
    }

    #[test]
    fn key_only_for_get_and_head() {
        let get = Request::new(Method::Get, "/a?x=1", Version::Http11).with_header("Accept", "text/html");
        let head = Request::new(Method::Head, "/a?x=1", Version::Http11);
        let post = Request::new(Method::Post, "/a", Version::Http11);

        let get_key = CacheKey::for_request(&get).unwrap();
        assert_eq!(get_key.target(), "/a?x=1");
        assert_ne!(Some(get_key), CacheKey::for_request(&head));
        assert_eq!(CacheKey::for_request(&post), None);
    }

    #[test]
    fn negotiation_headers_do_not_change_key() {
        let html = Request::new(Method::Get, "/", Version::Http11).with_header("Accept", "text/html");
        let json = Request::new(Method::Get, "/", Version::Http11).with_header("Accept", "application/json");
        assert_eq!(CacheKey::for_request(&html), CacheKey::for_request(&json));
    }

    #[test]
    fn set_then_get_is_byte_identical_and_idempotent() {
        let cache = ResponseCache::new(8, None);
        let stored = Arc::new(response("hello"));
        cache.set(key("/"), Arc::clone(&stored));

        let first = cache.get(&key("/")).unwrap();
        let second = cache.get(&key("/")).unwrap();
        assert_eq!(first.to_bytes(), stored.to_bytes());
        assert_eq!(second.to_bytes(), stored.to_bytes());
        assert!(cache.get(&key("/other")).is_none());
    }

    #[test]
    fn set_overwrites() {
        let cache = ResponseCache::new(8, None);
        cache.set(key("/"), Arc::new(response("one")));
        cache.set(key("/"), Arc::new(response("two")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("/")).unwrap().body(), b"two");
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ResponseCache::new(2, None);
        cache.set(key("/a"), Arc::new(response("a")));
        cache.set(key("/b"), Arc::new(response("b")));
        assert!(cache.get(&key("/a")).is_some());

        cache.set(key("/c"), Arc::new(response("c")));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("/a")).is_some());
        assert!(cache.get(&key("/b")).is_none());
        assert!(cache.get(&key("/c")).is_some());
    }

    #[test]
    fn expired_entries_miss() {
        let cache = ResponseCache::new(8, Some(Duration::from_millis(20)));
        cache.set(key("/"), Arc::new(response("x")));
        assert!(cache.get(&key("/")).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&key("/")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn miss_builds_then_hits() {
        let cache = ResponseCache::new(8, None);
        let (built, lookup) = cache.get_or_build(key("/"), || async { response("x") }).await;
        assert_eq!(lookup, Lookup::Built);

        let rebuilds = AtomicUsize::new(0);
        let (hit, lookup) = cache
            .get_or_build(key("/"), || async {
                rebuilds.fetch_add(1, Ordering::SeqCst);
                response("y")
            })
            .await;
        assert_eq!(lookup, Lookup::Hit);
        assert_eq!(rebuilds.load(Ordering::SeqCst), 0);
        assert_eq!(hit.to_bytes(), built.to_bytes());
    }

    #[tokio::test]
    async fn server_errors_are_not_stored() {
        let cache = ResponseCache::new(8, None);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (res, _) = cache
            .get_or_build(key("/"), || async move {
                build_error(Version::Http11, StatusCode::INTERNAL_SERVER_ERROR, now)
            })
            .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_build_once() {
        const CALLERS: usize = 32;

        let cache = Arc::new(ResponseCache::new(8, None));
        let builds = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(CALLERS));

        let mut tasks = Vec::new();
        for _ in 0..CALLERS {
            let cache = Arc::clone(&cache);
            let builds = Arc::clone(&builds);
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                let (response, _) = cache
                    .get_or_build(key("/shared"), || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        response("shared")
                    })
                    .await;
                response.to_bytes()
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(cache.inflight.is_empty());
    }
}
