// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Byte-level access to the shared tier.
//!
//! [`RemoteStore`] is the seam between the typed remote tier and the wire:
//! it deals only in canonical key strings and raw bytes. The production
//! implementation is [`RedisStore`]; tests substitute the in-memory doubles
//! from [`crate::testing`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use redis::AsyncCommands;
use tick::{Clock, FutureExt as _};

use gcache_tier::{Error, Result};

use crate::config::RedisConfig;
use crate::conn::RedisConn;

/// Creates a new connection. Invoked once per thread; the store caches the
/// result in thread-local storage, so the factory itself need not.
pub type ConnectionFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<RedisConn>> + Send + Sync>;

/// Key/value operations the shared tier is built on.
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetches raw bytes for a key.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;

    /// Fetches an envelope and its entity's watermark in one round-trip.
    fn get_with_watermark<'a>(
        &'a self,
        key: &'a str,
        watermark_key: &'a str,
    ) -> BoxFuture<'a, Result<(Option<Vec<u8>>, Option<Vec<u8>>)>>;

    /// Stores bytes under a key with a TTL.
    fn set_ex<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> BoxFuture<'a, Result<()>>;

    /// Removes a key. Returns whether it existed.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Removes every key.
    fn flushall(&self) -> BoxFuture<'_, Result<()>>;
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    // One connection per (thread, store). Async redis clients pin internal
    // state to the event loop that created them; bridge workers each run
    // their own loop, so connections must never cross threads.
    static THREAD_CONNECTIONS: RefCell<HashMap<u64, RedisConn>> = RefCell::new(HashMap::new());
}

/// The production [`RemoteStore`] backed by the redis crate.
pub struct RedisStore {
    factory: ConnectionFactory,
    clock: Clock,
    connect_timeout: Duration,
    response_timeout: Duration,
    store_id: u64,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("store_id", &self.store_id)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

/// Builds the default connection factory for a fixed config.
#[must_use]
pub fn default_client_factory(config: RedisConfig) -> ConnectionFactory {
    Arc::new(move || {
        let config = config.clone();
        Box::pin(async move {
            if config.cluster {
                let client = redis::cluster::ClusterClient::new(vec![config.url()]).map_err(Error::transport)?;
                let conn = client.get_async_connection().await.map_err(Error::transport)?;
                Ok(RedisConn::Cluster(conn))
            } else {
                let client = redis::Client::open(config.url()).map_err(Error::transport)?;
                let conn = client.get_connection_manager().await.map_err(Error::transport)?;
                Ok(RedisConn::Single(conn))
            }
        })
    })
}

impl RedisStore {
    /// Creates a store over a connection factory.
    ///
    /// The factory is called lazily, once per thread that touches the
    /// store. A user-supplied factory must return a fresh connection per
    /// call; sharing one client across threads is undefined behavior with
    /// event-loop-bound clients.
    #[must_use]
    pub fn new(factory: ConnectionFactory, clock: Clock, connect_timeout: Duration, response_timeout: Duration) -> Self {
        Self {
            factory,
            clock,
            connect_timeout,
            response_timeout,
            store_id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Creates a store from a fixed config using the default factory.
    #[must_use]
    pub fn from_config(config: RedisConfig, clock: Clock) -> Self {
        let connect_timeout = config.connect_timeout;
        let response_timeout = config.response_timeout;
        Self::new(default_client_factory(config), clock, connect_timeout, response_timeout)
    }

    async fn connection(&self) -> Result<RedisConn> {
        let cached = THREAD_CONNECTIONS.with(|conns| conns.borrow().get(&self.store_id).cloned());
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = (self.factory)()
            .timeout(&self.clock, self.connect_timeout)
            .await
            .map_err(Error::transport)??;
        THREAD_CONNECTIONS.with(|conns| {
            conns.borrow_mut().insert(self.store_id, conn.clone());
        });
        Ok(conn)
    }

    async fn timed<T>(&self, fut: impl Future<Output = redis::RedisResult<T>>) -> Result<T> {
        fut.timeout(&self.clock, self.response_timeout)
            .await
            .map_err(Error::transport)?
            .map_err(Error::transport)
    }
}

impl RemoteStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            self.timed(async move { conn.get::<_, Option<Vec<u8>>>(key).await }).await
        })
    }

    fn get_with_watermark<'a>(
        &'a self,
        key: &'a str,
        watermark_key: &'a str,
    ) -> BoxFuture<'a, Result<(Option<Vec<u8>>, Option<Vec<u8>>)>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let mut values = self
                .timed(async move { conn.mget::<_, Vec<Option<Vec<u8>>>>(vec![key, watermark_key]).await })
                .await?;
            if values.len() != 2 {
                return Err(Error::transport(format!(
                    "MGET returned {} values, expected 2",
                    values.len()
                )));
            }
            let watermark = values.pop().unwrap_or_default();
            let envelope = values.pop().unwrap_or_default();
            Ok((envelope, watermark))
        })
    }

    fn set_ex<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let seconds = ttl.as_secs().max(1);
            self.timed(async move { conn.set_ex::<_, _, ()>(key, value, seconds).await }).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let removed = self.timed(async move { conn.del::<_, i64>(key).await }).await?;
            Ok(removed > 0)
        })
    }

    fn flushall(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            self.timed(async move { redis::cmd("FLUSHALL").query_async::<()>(&mut conn).await }).await
        })
    }
}
