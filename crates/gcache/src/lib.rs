// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Read-through, multi-tier function-result cache with watermark
//! invalidation.
//!
//! gcache wraps functions so their results are cached through a fast
//! process-local tier and a shared redis tier, with:
//! - Per-use-case TTL and ramp configuration from a pluggable oracle
//! - O(1) entity invalidation via watermarks, no key scans or deletes
//! - An ambient enable scope so caching is opt-in per call path
//! - A bridge pool that serves sync callers without losing the scope
//! - Fail-open behavior: a broken cache degrades to the bare function
//!
//! Caching is eventually consistent with staleness bounded by TTLs and
//! invalidation latency; write paths should stay outside enable scopes.
//!
//! # Examples
//!
//! ```no_run
//! use gcache::{GCache, GCacheConfig};
//! use gcache_redis::RedisConfig;
//! use gcache_tier::{KeyConfig, KeyDescriptor, StaticConfigSource};
//! use tick::Clock;
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = StaticConfigSource::new([("user.load".to_string(), KeyConfig::enabled(300))]);
//! let gcache = GCache::new(
//!     GCacheConfig::builder(source, Clock::new_tokio())
//!         .redis_config(RedisConfig::default())
//!         .build(),
//! )?;
//!
//! let load_user = gcache.cached(
//!     KeyDescriptor::<String>::builder("user_id", "user.load")
//!         .id(|id: &String| id.clone())
//!         .track_for_invalidation()
//!         .build(),
//!     |id: String| async move { Ok::<_, std::io::Error>(format!("user-{id}")) },
//! )?;
//!
//! // First call under an enabled scope misses and stores; the second hits.
//! let user = gcache::scope::scoped(true, load_user.call("42".to_string())).await?;
//!
//! // Later, drop every cached result for that user in O(1).
//! gcache.invalidate("user_id", "42", 0).await;
//! # let _ = user;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod cached;
mod chain;
mod controller;
mod facade;
pub mod scope;
mod timing;

#[doc(inline)]
pub use cached::CachedFn;
#[doc(inline)]
pub use facade::{DEFAULT_LOCAL_CAPACITY, GCache, GCacheConfig, GCacheConfigBuilder};

pub use gcache_tier::{
    CacheKey, CacheLayer, ConfigSource, Error, KeyConfig, KeyDescriptor, Result, Serializer, StaticConfigSource,
};
