// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory tier implementation using moka.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use parking_lot::Mutex;

use gcache_tier::{CacheKey, CacheLayer, CacheTier, Error, Lookup};

/// A bounded in-memory tier backed by moka.
///
/// One `LocalTier` serves one registered use case. The underlying cache is
/// created lazily on the first store because the TTL is only known once the
/// use case's config has been resolved; until then every lookup is a miss.
/// The TTL is fixed for the lifetime of the cache, so later config changes
/// apply after the next [`clear`](CacheTier::clear) or process restart.
pub struct LocalTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<V>>,
}

struct Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    capacity: u64,
    cache: Mutex<Option<Cache<CacheKey, V>>>,
}

impl<V> Clone for LocalTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for LocalTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTier")
            .field("capacity", &self.inner.capacity)
            .field("initialized", &self.inner.cache.lock().is_some())
            .finish()
    }
}

impl<V> LocalTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a local tier bounded to `capacity` entries.
    ///
    /// Eviction beyond capacity uses moka's `TinyLFU` policy.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                cache: Mutex::new(None),
            }),
        }
    }

    /// Returns the number of entries currently held.
    ///
    /// The count is moka's eventually-consistent estimate.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.cache.lock().as_ref().map_or(0, Cache::entry_count)
    }

    /// Returns true when no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Option<Cache<CacheKey, V>> {
        self.inner.cache.lock().clone()
    }

    fn ensure(&self, ttl: Duration) -> Cache<CacheKey, V> {
        let mut guard = self.inner.cache.lock();
        guard
            .get_or_insert_with(|| {
                Cache::builder()
                    .max_capacity(self.inner.capacity)
                    .time_to_live(ttl)
                    .build()
            })
            .clone()
    }
}

impl<V> CacheTier<V> for LocalTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn layer(&self) -> CacheLayer {
        CacheLayer::Local
    }

    async fn get(&self, key: &CacheKey) -> Result<Lookup<V>, Error> {
        match self.current() {
            Some(cache) => Ok(cache.get(key).await.map_or_else(Lookup::miss, Lookup::Hit)),
            None => Ok(Lookup::miss()),
        }
    }

    async fn put(&self, key: &CacheKey, value: &V, ttl: Duration) -> Result<(), Error> {
        self.ensure(ttl).insert(key.clone(), value.clone()).await;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, Error> {
        match self.current() {
            Some(cache) => Ok(cache.remove(key).await.is_some()),
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<(), Error> {
        // Drop the cache entirely so the next store picks up a fresh TTL.
        let cache = self.inner.cache.lock().take();
        if let Some(cache) = cache {
            cache.invalidate_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> CacheKey {
        CacheKey::new("user_id", id, "uc", vec![], false)
    }

    #[tokio::test]
    async fn lookup_before_first_put_misses() {
        let tier = LocalTier::<i32>::new(16);
        assert_eq!(tier.get(&key("1")).await.expect("get should succeed"), Lookup::miss());
    }

    #[tokio::test]
    async fn put_then_get_hits() {
        let tier = LocalTier::<String>::new(16);
        let k = key("1");

        tier.put(&k, &"hello".to_string(), Duration::from_secs(60))
            .await
            .expect("put should succeed");
        assert_eq!(
            tier.get(&k).await.expect("get should succeed"),
            Lookup::Hit("hello".to_string())
        );
    }

    #[tokio::test]
    async fn keys_differing_in_args_do_not_collide() {
        let tier = LocalTier::<i32>::new(16);
        let a = CacheKey::new("t", "1", "uc", vec![("x".into(), "1".into())], false);
        let b = CacheKey::new("t", "1", "uc", vec![("x".into(), "2".into())], false);

        tier.put(&a, &1, Duration::from_secs(60)).await.expect("put should succeed");
        assert_eq!(tier.get(&a).await.expect("get should succeed"), Lookup::Hit(1));
        assert_eq!(tier.get(&b).await.expect("get should succeed"), Lookup::miss());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let tier = LocalTier::<i32>::new(16);
        let k = key("1");

        assert!(!tier.delete(&k).await.expect("delete should succeed"));
        tier.put(&k, &5, Duration::from_secs(60)).await.expect("put should succeed");
        assert!(tier.delete(&k).await.expect("delete should succeed"));
        assert_eq!(tier.get(&k).await.expect("get should succeed"), Lookup::miss());
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let tier = LocalTier::<i32>::new(16);
        let k = key("1");

        tier.put(&k, &5, Duration::from_secs(60)).await.expect("put should succeed");
        tier.clear().await.expect("clear should succeed");
        assert_eq!(tier.get(&k).await.expect("get should succeed"), Lookup::miss());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let tier = LocalTier::<i32>::new(16);
        let k = key("1");

        tier.put(&k, &5, Duration::from_millis(50)).await.expect("put should succeed");
        assert_eq!(tier.get(&k).await.expect("get should succeed"), Lookup::Hit(5));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(tier.get(&k).await.expect("get should succeed"), Lookup::miss());
    }
}
