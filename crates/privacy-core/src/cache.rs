//! Advisory TTL + tag cache for fast single-event and record lookup.
//!
//! Any component may read; components that mutate the underlying data must
//! invalidate by key prefix and by tag immediately after a successful write.
//! There is no cross-reader locking beyond the map lock itself — a reader
//! racing an invalidation may observe either the old or the evicted state.
//! The cache is advisory, never authoritative.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
    tags: Vec<String>,
}

/// Shared, TTL-governed, tag-indexed cache of JSON values.
#[derive(Debug, Clone, Default)]
pub struct TaggedCache {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl TaggedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` for `ttl`, indexed by `tags`.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[&str]) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        };
        self.inner.write().await.insert(key.to_owned(), entry);
    }

    /// Fetch the value under `key`, evicting it if the TTL has passed.
    pub async fn get(&self, key: &str) -> Option<Value> {
        {
            let map = self.inner.read().await;
            match map.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {} // expired; fall through to evict
                None => return None,
            }
        }
        self.inner.write().await.remove(key);
        None
    }

    /// Drop every entry whose key starts with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.inner
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));
    }

    /// Drop every entry carrying `tag`.
    pub async fn invalidate_tag(&self, tag: &str) {
        self.inner
            .write()
            .await
            .retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
    }

    /// Number of entries currently held (expired entries included until read).
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_and_get() {
        let cache = TaggedCache::new();
        cache
            .set("audit_event_1", json!({"id": 1}), Duration::from_secs(60), &["audit"])
            .await;
        assert_eq!(cache.get("audit_event_1").await, Some(json!({"id": 1})));
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let cache = TaggedCache::new();
        cache
            .set("k", json!(1), Duration::from_millis(0), &[])
            .await;
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_by_prefix() {
        let cache = TaggedCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("audit_event_1", json!(1), ttl, &[]).await;
        cache.set("audit_event_2", json!(2), ttl, &[]).await;
        cache.set("booking_5", json!(5), ttl, &[]).await;

        cache.invalidate_prefix("audit_").await;
        assert_eq!(cache.get("audit_event_1").await, None);
        assert_eq!(cache.get("booking_5").await, Some(json!(5)));
    }

    #[tokio::test]
    async fn invalidate_by_tag() {
        let cache = TaggedCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("a", json!(1), ttl, &["audit", "logs"]).await;
        cache.set("b", json!(2), ttl, &["bookings"]).await;

        cache.invalidate_tag("logs").await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(json!(2)));
    }
}
