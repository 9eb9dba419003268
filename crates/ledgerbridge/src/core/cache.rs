//! Read-through cache with a fixed time-to-live.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::Result;

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (Instant::now(), value));
        }
    }

    pub fn invalidate(&self, key: &K) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Returns the cached value or loads, stores and returns a fresh one.
    /// Failed loads are not cached.
    pub async fn get_or_try_load<F, Fut>(&self, key: K, load: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = load().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerbridge_api::SyncError;

    #[tokio::test]
    async fn test_read_through_loads_once_within_ttl() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60));
        let mut loads = 0;

        for _ in 0..3 {
            let value = cache
                .get_or_try_load("k", || {
                    loads += 1;
                    async { Ok(7) }
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(loads, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_reloads() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::ZERO);
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), None);

        let value = cache
            .get_or_try_load("k", || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60));
        let err = cache
            .get_or_try_load("k", || async { Err(SyncError::remote("down")) })
            .await;
        assert!(err.is_err());
        assert_eq!(cache.get(&"k"), None);

        cache.insert("k", 3);
        cache.invalidate(&"k");
        assert_eq!(cache.get(&"k"), None);
    }
}
