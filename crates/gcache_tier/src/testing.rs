// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock tier implementation for testing.
//!
//! [`MockTier`] stores values in memory, records every operation, and
//! supports failure injection for exercising fail-open paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::CacheLayer;
use crate::error::Error;
use crate::key::CacheKey;
use crate::tier::{CacheTier, Lookup};

/// A recorded tier operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOp {
    /// A get was performed with the given key.
    Get(CacheKey),
    /// A put was performed with the given key and TTL.
    Put {
        /// Key that was written.
        key: CacheKey,
        /// TTL the entry was stored with.
        ttl: Duration,
    },
    /// A delete was performed with the given key.
    Delete(CacheKey),
    /// The tier was cleared.
    Clear,
}

type FailPredicate = Box<dyn Fn(&TierOp) -> bool + Send + Sync>;

/// A configurable mock tier for testing controller and chain behavior.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use gcache_tier::{CacheKey, CacheTier, Lookup, testing::MockTier};
///
/// # futures::executor::block_on(async {
/// let tier = MockTier::<i32>::local();
/// let key = CacheKey::new("t", "1", "uc", vec![], false);
///
/// tier.put(&key, &42, Duration::from_secs(60)).await.unwrap();
/// assert_eq!(tier.get(&key).await.unwrap(), Lookup::Hit(42));
/// # });
/// ```
pub struct MockTier<V> {
    layer: CacheLayer,
    data: Arc<Mutex<HashMap<CacheKey, V>>>,
    operations: Arc<Mutex<Vec<TierOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl<V> Clone for MockTier<V> {
    fn clone(&self) -> Self {
        Self {
            layer: self.layer,
            data: Arc::clone(&self.data),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
        }
    }
}

impl<V> std::fmt::Debug for MockTier<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTier")
            .field("layer", &self.layer)
            .field("operations", &self.operations.lock().len())
            .finish_non_exhaustive()
    }
}

impl<V> MockTier<V> {
    /// Creates a mock tier reporting the given layer.
    #[must_use]
    pub fn new(layer: CacheLayer) -> Self {
        Self {
            layer,
            data: Arc::new(Mutex::new(HashMap::new())),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a mock local tier.
    #[must_use]
    pub fn local() -> Self {
        Self::new(CacheLayer::Local)
    }

    /// Creates a mock remote tier.
    #[must_use]
    pub fn remote() -> Self {
        Self::new(CacheLayer::Remote)
    }

    /// Fails any operation matching the predicate with a transport error.
    pub fn fail_when(&self, predicate: impl Fn(&TierOp) -> bool + Send + Sync + 'static) {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Returns every operation performed so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<TierOp> {
        self.operations.lock().clone()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns true when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    fn record(&self, op: TierOp) -> Result<(), Error> {
        let should_fail = self.fail_when.lock().as_ref().is_some_and(|pred| pred(&op));
        self.operations.lock().push(op);
        if should_fail {
            Err(Error::transport("simulated failure"))
        } else {
            Ok(())
        }
    }
}

impl<V> CacheTier<V> for MockTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn layer(&self) -> CacheLayer {
        self.layer
    }

    async fn get(&self, key: &CacheKey) -> Result<Lookup<V>, Error> {
        self.record(TierOp::Get(key.clone()))?;
        Ok(match self.data.lock().get(key) {
            Some(value) => Lookup::Hit(value.clone()),
            None => Lookup::miss(),
        })
    }

    async fn put(&self, key: &CacheKey, value: &V, ttl: Duration) -> Result<(), Error> {
        self.record(TierOp::Put {
            key: key.clone(),
            ttl,
        })?;
        self.data.lock().insert(key.clone(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, Error> {
        self.record(TierOp::Delete(key.clone()))?;
        Ok(self.data.lock().remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.record(TierOp::Clear)?;
        self.data.lock().clear();
        Ok(())
    }
}
