// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-local in-memory tier for the gcache read-through cache.
//!
//! The local tier is a bounded, TTL-indexed mapping from canonical keys to
//! bare values. It is deliberately oblivious to invalidation watermarks:
//! its staleness is bounded only by its TTL and capacity-based eviction.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use gcache_memory::LocalTier;
//! use gcache_tier::{CacheKey, CacheTier, Lookup};
//!
//! # futures::executor::block_on(async {
//! let tier = LocalTier::<i32>::new(10_000);
//! let key = CacheKey::new("user_id", "42", "uc", vec![], false);
//!
//! tier.put(&key, &7, Duration::from_secs(60)).await?;
//! assert_eq!(tier.get(&key).await?, Lookup::Hit(7));
//! # Ok::<(), gcache_tier::Error>(())
//! # });
//! ```

mod tier;

#[doc(inline)]
pub use tier::LocalTier;
