// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The public facade: registration, invalidation, and lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use opentelemetry::metrics::Meter;
use parking_lot::Mutex;
use tick::Clock;

use gcache_memory::LocalTier;
use gcache_redis::{ConnectionFactory, RedisConfig, RedisStore, RemoteStore, RemoteTier, write_watermark};
use gcache_tier::{
    BincodeSerializer, CacheKey, CacheTier, ConfigSource, Error, ErrorStage, GcacheTelemetry, KeyDescriptor,
    RESERVED_USE_CASE, Result, Serializer, key,
};

use crate::bridge::EventLoopPool;
use crate::cached::CachedFn;
use crate::chain::{CacheChain, RemoteArm};
use crate::controller::Controller;

/// Default bound on entries per use case in the local tier.
pub const DEFAULT_LOCAL_CAPACITY: u64 = 10_000;

const DEFAULT_METRICS_PREFIX: &str = "api_";

// One live facade per process. Registration is global (decorator
// semantics) and metrics are process-wide, so a second instance would
// silently split both.
static INSTANTIATED: AtomicBool = AtomicBool::new(false);

enum RemoteBackend {
    Config(RedisConfig),
    Factory(ConnectionFactory),
    Store(Arc<dyn RemoteStore>),
}

/// Configuration for [`GCache`].
///
/// Built via [`GCacheConfig::builder`]. At most one shared-tier backend may
/// be set (fixed redis config, client factory, or custom store); with none,
/// the cache runs local-only and invalidation is a no-op.
pub struct GCacheConfig {
    config_source: Arc<dyn ConfigSource>,
    clock: Clock,
    urn_prefix: Option<String>,
    metrics_prefix: String,
    meter: Option<Meter>,
    local_capacity: u64,
    backends: Vec<RemoteBackend>,
}

impl std::fmt::Debug for GCacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GCacheConfig")
            .field("urn_prefix", &self.urn_prefix)
            .field("metrics_prefix", &self.metrics_prefix)
            .field("local_capacity", &self.local_capacity)
            .field("backends", &self.backends.len())
            .finish_non_exhaustive()
    }
}

impl GCacheConfig {
    /// Starts building a config around the required pieces: the
    /// configuration oracle and a clock.
    #[must_use]
    pub fn builder(config_source: impl ConfigSource, clock: Clock) -> GCacheConfigBuilder {
        GCacheConfigBuilder {
            config: Self {
                config_source: Arc::new(config_source),
                clock,
                urn_prefix: None,
                metrics_prefix: DEFAULT_METRICS_PREFIX.to_string(),
                meter: None,
                local_capacity: DEFAULT_LOCAL_CAPACITY,
                backends: Vec::new(),
            },
        }
    }
}

/// Builder for [`GCacheConfig`].
pub struct GCacheConfigBuilder {
    config: GCacheConfig,
}

impl std::fmt::Debug for GCacheConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GCacheConfigBuilder").field("config", &self.config).finish()
    }
}

impl GCacheConfigBuilder {
    /// Overrides the URN prefix rendered into every key (default `urn`).
    #[must_use]
    pub fn urn_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.urn_prefix = Some(prefix.into());
        self
    }

    /// Overrides the prefix prepended to every metric name (default `api_`).
    #[must_use]
    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.metrics_prefix = prefix.into();
        self
    }

    /// Sets the meter metrics are published on. Without one, metrics are
    /// disabled.
    #[must_use]
    pub fn meter(mut self, meter: Meter) -> Self {
        self.config.meter = Some(meter);
        self
    }

    /// Overrides the per-use-case local tier capacity.
    #[must_use]
    pub fn local_capacity(mut self, capacity: u64) -> Self {
        self.config.local_capacity = capacity;
        self
    }

    /// Connects the shared tier with a fixed config.
    #[must_use]
    pub fn redis_config(mut self, config: RedisConfig) -> Self {
        self.config.backends.push(RemoteBackend::Config(config));
        self
    }

    /// Connects the shared tier through a custom client factory.
    ///
    /// The factory is invoked once per thread touching the shared tier and
    /// must return a connection usable from that thread's event loop.
    #[must_use]
    pub fn redis_client_factory(mut self, factory: ConnectionFactory) -> Self {
        self.config.backends.push(RemoteBackend::Factory(factory));
        self
    }

    /// Connects the shared tier to a custom byte store, bypassing redis
    /// entirely. Used by tests and by deployments with their own transport.
    #[must_use]
    pub fn remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.config.backends.push(RemoteBackend::Store(store));
        self
    }

    /// Finishes the config.
    #[must_use]
    pub fn build(self) -> GCacheConfig {
        self.config
    }
}

/// Removal and flush operations on one use case's local tier, erased over
/// the value type.
trait LocalAdmin: Send + Sync {
    fn delete<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, bool>;
    fn clear(&self) -> BoxFuture<'_, ()>;
}

struct LocalAdminHandle<V>(LocalTier<V>)
where
    V: Clone + Send + Sync + 'static;

impl<V> LocalAdmin for LocalAdminHandle<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn delete<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.0.delete(key).await.unwrap_or(false) })
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.0.clear().await;
        })
    }
}

struct Shared {
    config_source: Arc<dyn ConfigSource>,
    telemetry: GcacheTelemetry,
    clock: Clock,
    store: Option<Arc<dyn RemoteStore>>,
    local_capacity: u64,
    bridge: Arc<EventLoopPool>,
    registry: Mutex<HashMap<String, Arc<dyn LocalAdmin>>>,
}

impl Shared {
    async fn invalidate(&self, key_type: &str, id: &str, buffer_ms: u64) {
        let Some(store) = &self.store else {
            tracing::debug!(key_type, id, "no shared tier configured, invalidate is a no-op");
            return;
        };

        self.telemetry.record_invalidation(key_type);
        if let Err(e) = write_watermark(store.as_ref(), &self.clock, key_type, id, buffer_ms).await {
            tracing::error!(key_type, id, error = %e, "watermark write failed");
            self.telemetry.record_error("", key_type, ErrorStage::Watermark);
        }
    }

    async fn flushall(&self) {
        let admins: Vec<Arc<dyn LocalAdmin>> = self.registry.lock().values().cloned().collect();
        for admin in admins {
            admin.clear().await;
        }

        if let Some(store) = &self.store
            && let Err(e) = store.flushall().await
        {
            tracing::error!(error = %e, "shared tier flush failed");
            self.telemetry.record_error("", "", ErrorStage::SharedSet);
        }
    }

    async fn remove(&self, cache_key: &CacheKey) -> bool {
        let admin = self.registry.lock().get(cache_key.use_case()).cloned();
        let mut removed = match admin {
            Some(admin) => admin.delete(cache_key).await,
            None => false,
        };

        if let Some(store) = &self.store {
            match store.delete(&cache_key.urn()).await {
                Ok(was_present) => removed |= was_present,
                Err(e) => {
                    tracing::error!(key = %cache_key, error = %e, "shared tier delete failed");
                    self.telemetry
                        .record_error(cache_key.use_case(), cache_key.key_type(), ErrorStage::SharedSet);
                }
            }
        }
        removed
    }
}

/// The process-wide cache facade.
///
/// Registers functions for caching, scopes enablement, and exposes the
/// invalidation entry points. Exactly one live instance is allowed per
/// process; dropping it stops the bridge pool and releases the slot.
///
/// # Examples
///
/// ```no_run
/// use gcache::{GCache, GCacheConfig};
/// use gcache_redis::RedisConfig;
/// use gcache_tier::{KeyConfig, KeyDescriptor, StaticConfigSource};
/// use tick::Clock;
///
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = StaticConfigSource::new([("profile.load".to_string(), KeyConfig::enabled(300))]);
/// let gcache = GCache::new(
///     GCacheConfig::builder(source, Clock::new_tokio())
///         .redis_config(RedisConfig::default())
///         .build(),
/// )?;
///
/// let load_profile = gcache.cached(
///     KeyDescriptor::<u64>::builder("user_id", "profile.load")
///         .id(|user_id| user_id.to_string())
///         .track_for_invalidation()
///         .build(),
///     |user_id: u64| async move { Ok::<_, std::io::Error>(format!("profile-{user_id}")) },
/// )?;
///
/// let profile = gcache::scope::scoped(true, load_profile.call(42)).await?;
/// # let _ = profile;
/// # Ok(())
/// # }
/// ```
pub struct GCache {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for GCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GCache")
            .field("has_remote", &self.inner.store.is_some())
            .field("registered_use_cases", &self.inner.registry.lock().len())
            .finish_non_exhaustive()
    }
}

impl GCache {
    /// Creates the facade.
    ///
    /// # Errors
    ///
    /// [`Error::SingletonViolation`] when another instance is live, and
    /// [`Error::ConflictingRedisConfig`] when more than one shared-tier
    /// backend was supplied.
    pub fn new(config: GCacheConfig) -> Result<Self> {
        INSTANTIATED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::SingletonViolation)?;

        match Self::build(config) {
            Ok(facade) => Ok(facade),
            Err(e) => {
                INSTANTIATED.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn build(mut config: GCacheConfig) -> Result<Self> {
        if config.backends.len() > 1 {
            return Err(Error::ConflictingRedisConfig);
        }

        if let Some(prefix) = &config.urn_prefix {
            key::set_urn_prefix(prefix.clone());
        }

        let telemetry = GcacheTelemetry::new(config.meter.as_ref(), &config.metrics_prefix, config.clock.clone());

        let store: Option<Arc<dyn RemoteStore>> = config.backends.pop().map(|backend| match backend {
            RemoteBackend::Config(redis_config) => {
                Arc::new(RedisStore::from_config(redis_config, config.clock.clone())) as Arc<dyn RemoteStore>
            }
            RemoteBackend::Factory(factory) => {
                let defaults = RedisConfig::default();
                Arc::new(RedisStore::new(
                    factory,
                    config.clock.clone(),
                    defaults.connect_timeout,
                    defaults.response_timeout,
                )) as Arc<dyn RemoteStore>
            }
            RemoteBackend::Store(store) => store,
        });

        Ok(Self {
            inner: Arc::new(Shared {
                config_source: config.config_source,
                telemetry,
                clock: config.clock,
                store,
                local_capacity: config.local_capacity,
                bridge: Arc::new(EventLoopPool::new("gcache-bridge")),
                registry: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Registers a function for caching with the default binary serializer.
    ///
    /// The returned [`CachedFn`] owns everything it needs; it stays usable
    /// for async calls after the facade is dropped, though sync calls then
    /// fail because the bridge is stopped.
    ///
    /// # Errors
    ///
    /// [`Error::ReservedUseCase`] for the use case `watermark`, and
    /// [`Error::UseCaseAlreadyRegistered`] for a duplicate registration.
    pub fn cached<A, V, E, F, Fut>(&self, descriptor: KeyDescriptor<A>, function: F) -> Result<CachedFn<A, V, E>>
    where
        A: Send + 'static,
        V: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
        E: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    {
        self.cached_with_serializer(descriptor, Arc::new(BincodeSerializer::new()), function)
    }

    /// Registers a function for caching with a custom serializer.
    ///
    /// The serializer's output must deserialize back into the function's
    /// return type, otherwise cache hits produce runtime type errors.
    ///
    /// # Errors
    ///
    /// Same as [`cached`](Self::cached).
    pub fn cached_with_serializer<A, V, E, F, Fut>(
        &self,
        descriptor: KeyDescriptor<A>,
        serializer: Arc<dyn Serializer<V>>,
        function: F,
    ) -> Result<CachedFn<A, V, E>>
    where
        A: Send + 'static,
        V: Clone + Send + Sync + 'static,
        E: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    {
        let use_case = descriptor.use_case().to_string();
        if use_case == RESERVED_USE_CASE {
            return Err(Error::ReservedUseCase);
        }

        let local = LocalTier::new(self.inner.local_capacity);
        {
            let mut registry = self.inner.registry.lock();
            if registry.contains_key(&use_case) {
                return Err(Error::UseCaseAlreadyRegistered(use_case));
            }
            registry.insert(use_case.clone(), Arc::new(LocalAdminHandle(local.clone())));
        }

        let remote = match &self.inner.store {
            Some(store) => RemoteArm::Redis(RemoteTier::new(
                Arc::clone(store),
                serializer,
                self.inner.telemetry.clone(),
                self.inner.clock.clone(),
            )),
            None => RemoteArm::Noop,
        };

        let controller = Controller::new(
            use_case,
            descriptor.key_type().to_string(),
            descriptor.default_config().cloned(),
            CacheChain::new(local, remote, self.inner.telemetry.clone(), self.inner.clock.clone()),
            Arc::clone(&self.inner.config_source),
            self.inner.telemetry.clone(),
            self.inner.clock.clone(),
        );

        let fallback: Arc<dyn Fn(A) -> BoxFuture<'static, std::result::Result<V, E>> + Send + Sync> =
            Arc::new(move |args| Box::pin(function(args)));

        Ok(CachedFn::new(
            Arc::new(controller),
            Arc::new(descriptor),
            fallback,
            Arc::clone(&self.inner.bridge),
        ))
    }

    /// Opens a sync enable scope. Equivalent to [`crate::scope::enable`].
    #[must_use]
    pub fn enable(&self, enabled: bool) -> crate::scope::ScopeGuard {
        crate::scope::enable(enabled)
    }

    /// Invalidates every shared-tier entry for `(key_type, id)` by writing
    /// a watermark `buffer_ms` into the future.
    ///
    /// O(1): no keys are scanned or deleted; tracked reads filter stale
    /// envelopes until TTL reclaims them. The local tier is not addressable
    /// by invalidation; its staleness is bounded by its TTL.
    pub async fn invalidate(&self, key_type: &str, id: &str, buffer_ms: u64) {
        self.inner.invalidate(key_type, id, buffer_ms).await;
    }

    /// Sync counterpart of [`invalidate`](Self::invalidate), run on the
    /// bridge.
    ///
    /// # Errors
    ///
    /// [`Error::ReentrantSyncCall`] or [`Error::Bridge`] from the bridge;
    /// the watermark write itself is fail-open.
    pub fn invalidate_blocking(&self, key_type: &str, id: &str, buffer_ms: u64) -> Result<()> {
        let shared = Arc::clone(&self.inner);
        let key_type = key_type.to_string();
        let id = id.to_string();
        self.inner
            .bridge
            .submit(async move { shared.invalidate(&key_type, &id, buffer_ms).await })
    }

    /// Removes every entry from both tiers. Useful for tests.
    pub async fn flushall(&self) {
        self.inner.flushall().await;
    }

    /// Sync counterpart of [`flushall`](Self::flushall), run on the bridge.
    ///
    /// # Errors
    ///
    /// [`Error::ReentrantSyncCall`] or [`Error::Bridge`] from the bridge.
    pub fn flushall_blocking(&self) -> Result<()> {
        let shared = Arc::clone(&self.inner);
        self.inner.bridge.submit(async move { shared.flushall().await })
    }

    /// Removes one key from both tiers, at the caller's risk: concurrent
    /// readers may repopulate it immediately. Returns whether any tier held
    /// the key.
    pub async fn remove(&self, cache_key: &CacheKey) -> bool {
        self.inner.remove(cache_key).await
    }

    /// Sync counterpart of [`remove`](Self::remove), run on the bridge.
    ///
    /// # Errors
    ///
    /// [`Error::ReentrantSyncCall`] or [`Error::Bridge`] from the bridge.
    pub fn remove_blocking(&self, cache_key: &CacheKey) -> Result<bool> {
        let shared = Arc::clone(&self.inner);
        let cache_key = cache_key.clone();
        self.inner.bridge.submit(async move { shared.remove(&cache_key).await })
    }
}

impl Drop for GCache {
    fn drop(&mut self) {
        self.inner.bridge.stop();
        key::reset_urn_prefix();
        INSTANTIATED.store(false, Ordering::Release);
    }
}
