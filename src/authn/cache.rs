//! Byte-valued TTL cache for remote OIDC material.
//!
//! Stores the raw JSON bytes of discovery documents, JWKS and userinfo
//! responses, keyed `config:<issuer>`, `jwks:<issuer>` and
//! `userinfo:<token>`. Entries are parsed again on every use; only bytes are
//! cached, so a failed parse can never poison the cache with a half-built
//! object.
//!
//! Concurrent misses on the same key are collapsed into a single fetch with
//! a per-key async lock; the losers of the race re-read the cache instead of
//! hammering the identity provider.

use std::future::Future;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::AuthnError;

#[derive(Debug)]
struct Entry {
    value: Bytes,
    cached_at: Instant,
}

/// Thread-safe byte cache with a single TTL for all entries.
#[derive(Debug)]
pub struct TtlCache {
    entries: DashMap<String, Entry>,
    flights: DashMap<String, std::sync::Arc<Mutex<()>>>,
    ttl: Duration,
}

impl TtlCache {
    /// Create a cache whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            flights: DashMap::new(),
            ttl,
        }
    }

    /// Return the entry for `key` if it exists and has not expired.
    #[must_use]
    pub fn fresh(&self, key: &str) -> Option<Bytes> {
        let entry = self.entries.get(key)?;
        if entry.cached_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Return the entry for `key` even when it has expired.
    ///
    /// Expired entries are kept until replaced so that a failed refresh can
    /// fall back on the last known good value.
    #[must_use]
    pub fn stale(&self, key: &str) -> Option<Bytes> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store a value under `key`, resetting its TTL.
    pub fn set(&self, key: &str, value: Bytes) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    /// Number of entries, fresh and expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries that expired before the given grace period ago.
    ///
    /// A grace of zero sweeps everything expired; a non-zero grace keeps
    /// recently-expired entries around as stale-fallback material.
    pub fn evict_expired(&self, grace: Duration) {
        let deadline = self.ttl + grace;
        self.entries.retain(|_, entry| entry.cached_at.elapsed() < deadline);
    }

    /// Look up `key`, running `fetch` on a miss.
    ///
    /// Only one fetch per key is in flight at a time; concurrent callers
    /// wait and then re-read the cache. On fetch failure, a stale entry is
    /// returned when `stale_on_error` is set and one exists; the fetch
    /// result is otherwise propagated. Only successful fetches are cached.
    pub async fn fetch_through<F, Fut>(
        &self,
        key: &str,
        stale_on_error: bool,
        fetch: F,
    ) -> Result<Bytes, AuthnError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, AuthnError>>,
    {
        if let Some(value) = self.fresh(key) {
            return Ok(value);
        }

        let lock = {
            let entry = self.flights.entry(key.to_string()).or_default();
            std::sync::Arc::clone(entry.value())
        };
        let _guard = lock.lock().await;

        // Another caller may have fetched while we waited for the lock.
        if let Some(value) = self.fresh(key) {
            return Ok(value);
        }

        let result = fetch().await;
        self.flights.remove(key);
        match result {
            Ok(value) => {
                self.set(key, value.clone());
                Ok(value)
            }
            Err(e) => {
                if stale_on_error {
                    if let Some(value) = self.stale(key) {
                        tracing::warn!(key = %key, error = %e, "fetch failed, using stale cache entry");
                        return Ok(value);
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_ms: u64) -> TtlCache {
        TtlCache::new(Duration::from_millis(ttl_ms))
    }

    #[test]
    fn fresh_hit_within_ttl() {
        let cache = cache(60_000);
        cache.set("config:a", Bytes::from_static(b"{}"));

        assert_eq!(cache.fresh("config:a"), Some(Bytes::from_static(b"{}")));
        assert_eq!(cache.fresh("config:b"), None);
    }

    #[test]
    fn expired_entry_is_not_fresh_but_remains_stale() {
        let cache = cache(1);
        cache.set("jwks:a", Bytes::from_static(b"{}"));

        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.fresh("jwks:a"), None);
        assert_eq!(cache.stale("jwks:a"), Some(Bytes::from_static(b"{}")));
    }

    #[test]
    fn evict_expired_sweeps_old_entries() {
        let cache = cache(1);
        cache.set("userinfo:t1", Bytes::from_static(b"{}"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("userinfo:t2", Bytes::from_static(b"{}"));

        cache.evict_expired(Duration::ZERO);

        assert_eq!(cache.len(), 1);
        assert!(cache.stale("userinfo:t1").is_none());
        assert!(cache.stale("userinfo:t2").is_some());
    }

    #[tokio::test]
    async fn fetch_through_caches_successful_fetches() {
        let cache = cache(60_000);

        let first = cache
            .fetch_through("config:a", false, || async { Ok(Bytes::from_static(b"one")) })
            .await
            .unwrap();
        assert_eq!(first, Bytes::from_static(b"one"));

        // Second call must be served from cache, not the new fetch.
        let second = cache
            .fetch_through("config:a", false, || async {
                Ok(Bytes::from_static(b"two"))
            })
            .await
            .unwrap();
        assert_eq!(second, Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn fetch_through_does_not_cache_failures() {
        let cache = cache(60_000);

        let result = cache
            .fetch_through("config:a", false, || async {
                Err(AuthnError::Discovery("boom".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn fetch_through_falls_back_on_stale_entry() {
        let cache = cache(1);
        cache.set("jwks:a", Bytes::from_static(b"old"));
        std::thread::sleep(Duration::from_millis(5));

        let result = cache
            .fetch_through("jwks:a", true, || async {
                Err(AuthnError::Discovery("unreachable".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(result, Bytes::from_static(b"old"));

        // Without the fallback flag, the error surfaces.
        let result = cache
            .fetch_through("jwks:a", false, || async {
                Err(AuthnError::Discovery("unreachable".to_string()))
            })
            .await;
        assert!(result.is_err());
    }
}
