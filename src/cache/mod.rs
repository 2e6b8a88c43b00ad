//! Response cache for expensive API endpoints.
//!
//! Entries are keyed by request path + raw query string + the caller's
//! authenticated flag, concatenated into one opaque string, so the same
//! coordinates requested by an authenticated and an anonymous caller
//! produce distinct entries. Entries expire after a fixed TTL; nothing
//! invalidates them on data mutation (accepted staleness window).

use crate::config::CacheConfig;
use cached::{Cached, TimedSizedCache};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Mutex<TimedSizedCache<String, Value>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimedSizedCache::with_size_and_lifespan(
                config.capacity,
                config.ttl_seconds,
            ))),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build the opaque cache key for a request.
    pub fn cache_key(path: &str, raw_query: &str, authenticated: bool) -> String {
        format!("{}{}{}", path, raw_query, authenticated)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut cache = self.inner.lock().expect("response cache poisoned");
        let hit = cache.cache_get(&key.to_string()).cloned();
        match hit {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, value: Value) {
        let mut cache = self.inner.lock().expect("response cache poisoned");
        cache.cache_set(key, value);
    }

    /// Return the cached value for `key`, or run `compute` and cache its
    /// result. Concurrent misses on the same key may each compute; last
    /// write wins, which is fine for idempotent GET payloads.
    pub async fn get_or_compute<F, Fut>(&self, key: String, compute: F) -> anyhow::Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        if let Some(value) = self.get(&key) {
            debug!(key = %key, "response cache hit");
            return Ok(value);
        }

        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// (hits, misses) since startup.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn cache() -> ResponseCache {
        ResponseCache::new(&CacheConfig {
            ttl_seconds: 3600,
            capacity: 128,
        })
    }

    #[test]
    fn test_cache_key_partitions_on_auth() {
        let anon = ResponseCache::cache_key("/api/locations/", "x=2&y=4&z=6", false);
        let auth = ResponseCache::cache_key("/api/locations/", "x=2&y=4&z=6", true);
        assert_ne!(anon, auth);
    }

    #[tokio::test]
    async fn test_second_request_skips_compute() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_compute("k".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"data": 1}))
                })
                .await
                .unwrap();
            assert_eq!(value["data"], 1);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_query_bypasses_entry() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        for query in ["x=2&y=4&z=6", "x=2&y=4&z=6&r=10"] {
            let key = ResponseCache::cache_key("/api/locations/", query, false);
            cache
                .get_or_compute(key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({}))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_compute_errors_are_not_cached() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute("k".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("store offline")
            })
            .await;
        assert!(first.is_err());

        let second = cache
            .get_or_compute("k".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"ok": true}))
            })
            .await
            .unwrap();
        assert_eq!(second["ok"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
