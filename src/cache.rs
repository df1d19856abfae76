//! In-memory transcript cache with TTL expiry, LRU eviction and one upstream
//! fetch per key at a time.
//!
//! Lookups, inserts, recency updates and in-flight markers all go through a
//! single mutex that is never held across an `.await`. A fetch runs on its own
//! task, so callers that give up waiting do not cancel it and its result still
//! lands in the cache.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use crate::transcript::{TranscriptResult, UpstreamError};

pub type FetchOutcome = Result<Arc<TranscriptResult>, UpstreamError>;

type InFlight = Shared<BoxFuture<'static, FetchOutcome>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache capacity must be greater than zero")]
    ZeroCapacity,
    #[error("cache TTL must be greater than zero")]
    ZeroTtl,
    #[error("cache key needs a non-empty video id")]
    EmptyVideoId,
    #[error("cache key needs at least one language")]
    NoLanguages,
}

/// Identifies a transcript by video and by the ordered languages it was
/// resolved against. Requests that resolve to the same candidate list share
/// an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    video_id: String,
    languages: Vec<String>,
}

impl CacheKey {
    pub fn new(video_id: impl Into<String>, languages: Vec<String>) -> Result<Self, CacheError> {
        let video_id = video_id.into();
        if video_id.is_empty() {
            return Err(CacheError::EmptyVideoId);
        }
        if languages.is_empty() {
            return Err(CacheError::NoLanguages);
        }
        Ok(Self {
            video_id,
            languages,
        })
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.video_id, self.languages.join(","))
    }
}

struct CacheEntry {
    value: Arc<TranscriptResult>,
    created_at: Instant,
    expires_at: Instant,
}

struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    in_flight: HashMap<CacheKey, InFlight>,
}

impl CacheState {
    /// Returns a live entry and marks it most recently used. Expired entries
    /// are dropped on the spot.
    fn lookup(&mut self, key: &CacheKey, now: Instant) -> Option<Arc<TranscriptResult>> {
        let expired = match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(Arc::clone(&entry.value)),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(key);
            debug!("Cache entry {key} expired");
        }
        None
    }

    fn store(&mut self, key: CacheKey, value: Arc<TranscriptResult>, now: Instant, ttl: Duration) {
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now + ttl,
        };
        if let Some((evicted, old)) = self.entries.push(key.clone(), entry) {
            if evicted != key {
                info!(
                    "Cache full, evicted {evicted} (cached {:?} ago)",
                    now.saturating_duration_since(old.created_at)
                );
            }
        }
    }
}

/// Process-wide transcript cache. Build it once and share it behind an `Arc`.
pub struct TranscriptCache {
    state: Arc<Mutex<CacheState>>,
    capacity: NonZeroUsize,
    ttl: Duration,
}

impl TranscriptCache {
    pub fn new(capacity: usize, ttl: Duration) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(CacheError::ZeroCapacity)?;
        if ttl.is_zero() {
            return Err(CacheError::ZeroTtl);
        }
        Ok(Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
            })),
            capacity,
            ttl,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of resident entries, expired ones included until they are
    /// looked up or evicted.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.state.lock().entries.pop(key).is_some();
        if removed {
            debug!("Cache entry {key} invalidated");
        }
        removed
    }

    /// Returns the cached transcript for `key`, or runs `fetch` to produce it.
    ///
    /// Concurrent callers for a key that is already being fetched wait for
    /// that fetch instead of starting their own, and all of them see the same
    /// outcome. Failures are handed to every waiter but never cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &CacheKey, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TranscriptResult, UpstreamError>> + Send + 'static,
    {
        let flight = {
            let mut state = self.state.lock();
            if let Some(value) = state.lookup(key, Instant::now()) {
                debug!("Cache hit for {key}");
                return Ok(value);
            }
            match state.in_flight.get(key) {
                Some(flight) => {
                    debug!("Joining in-flight fetch for {key}");
                    flight.clone()
                }
                None => {
                    debug!("Cache miss for {key}, starting fetch");
                    let flight = self.spawn_fetch(key.clone(), fetch());
                    state.in_flight.insert(key.clone(), flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    fn spawn_fetch<Fut>(&self, key: CacheKey, fetch: Fut) -> InFlight
    where
        Fut: Future<Output = Result<TranscriptResult, UpstreamError>> + Send + 'static,
    {
        let ttl = self.ttl;
        let task_state = Arc::clone(&self.state);
        let task_key = key.clone();
        // The marker is inserted under the same lock acquisition that spawns
        // this task, so the task cannot clear it before it exists.
        let handle = tokio::spawn(async move {
            let outcome = fetch.await.map(Arc::new);
            let mut state = task_state.lock();
            state.in_flight.remove(&task_key);
            if let Ok(value) = &outcome {
                state.store(task_key, Arc::clone(value), Instant::now(), ttl);
            }
            outcome
        });

        let state = Arc::clone(&self.state);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Fetch task for {key} did not complete: {e}");
                    state.lock().in_flight.remove(&key);
                    Err(UpstreamError::Unknown(format!("fetch task failed: {e}")))
                }
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
impl TranscriptCache {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live value for `key`, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<TranscriptResult>> {
        self.state.lock().lookup(key, Instant::now())
    }

    /// Expiry of the resident entry for `key`, without touching recency.
    pub fn expires_at(&self, key: &CacheKey) -> Option<Instant> {
        self.state.lock().entries.peek(key).map(|entry| entry.expires_at)
    }
}
