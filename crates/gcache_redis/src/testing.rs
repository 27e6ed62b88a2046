// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory stand-ins for the redis transport.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tick::Clock;

use gcache_tier::{Error, Result};

use crate::store::RemoteStore;

/// A [`RemoteStore`] backed by a process-local map.
///
/// TTLs are honored against the supplied clock, so frozen-clock tests can
/// step time across expiry boundaries deterministically.
pub struct InMemoryStore {
    clock: Clock,
    data: Mutex<HashMap<String, (Vec<u8>, SystemTime)>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").field("len", &self.data.lock().len()).finish()
    }
}

impl InMemoryStore {
    /// Creates an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            data: Mutex::new(HashMap::new()),
        }
    }

    fn live_value(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.system_time();
        let guard = self.data.lock();
        guard.get(key).and_then(|(bytes, deadline)| (now < *deadline).then(|| bytes.clone()))
    }

    /// Returns whether a live entry exists for the key.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.live_value(key).is_some()
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl RemoteStore for InMemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move { Ok(self.live_value(key)) })
    }

    fn get_with_watermark<'a>(
        &'a self,
        key: &'a str,
        watermark_key: &'a str,
    ) -> BoxFuture<'a, Result<(Option<Vec<u8>>, Option<Vec<u8>>)>> {
        Box::pin(async move { Ok((self.live_value(key), self.live_value(watermark_key))) })
    }

    fn set_ex<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let deadline = self.clock.system_time() + ttl;
            self.data.lock().insert(key.to_string(), (value, deadline));
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.data.lock().remove(key).is_some()) })
    }

    fn flushall(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.data.lock().clear();
            Ok(())
        })
    }
}

/// A [`RemoteStore`] whose every operation fails with a transport error.
/// Exercises the fail-open paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStore;

impl FailingStore {
    fn fail<T>() -> Result<T> {
        Err(Error::transport("simulated transport failure"))
    }
}

impl RemoteStore for FailingStore {
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move { Self::fail() })
    }

    fn get_with_watermark<'a>(
        &'a self,
        _key: &'a str,
        _watermark_key: &'a str,
    ) -> BoxFuture<'a, Result<(Option<Vec<u8>>, Option<Vec<u8>>)>> {
        Box::pin(async move { Self::fail() })
    }

    fn set_ex<'a>(&'a self, _key: &'a str, _value: Vec<u8>, _ttl: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Self::fail() })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Self::fail() })
    }

    fn flushall(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Self::fail() })
    }
}
