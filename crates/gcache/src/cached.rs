// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The wrapped form of a registered function.

use std::sync::Arc;

use futures::future::BoxFuture;

use gcache_tier::{Error, KeyDescriptor};

use crate::bridge::EventLoopPool;
use crate::controller::Controller;

type Fallback<A, V, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

/// A registered, cache-wrapped function.
///
/// Obtained from [`GCache::cached`](crate::GCache::cached). Async callers
/// use [`call`](Self::call); sync callers use
/// [`call_blocking`](Self::call_blocking), which runs the call on a bridge
/// worker while preserving the caller's enable scope.
///
/// Whether a given call actually consults the cache depends on the ambient
/// enable scope and the use case's configuration; outside an enabled scope
/// the wrapped function behaves exactly like the bare one.
pub struct CachedFn<A, V, E>
where
    V: Clone + Send + Sync + 'static,
{
    controller: Arc<Controller<V>>,
    descriptor: Arc<KeyDescriptor<A>>,
    fallback: Fallback<A, V, E>,
    bridge: Arc<EventLoopPool>,
}

impl<A, V, E> Clone for CachedFn<A, V, E>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            descriptor: Arc::clone(&self.descriptor),
            fallback: Arc::clone(&self.fallback),
            bridge: Arc::clone(&self.bridge),
        }
    }
}

impl<A, V, E> std::fmt::Debug for CachedFn<A, V, E>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFn").field("descriptor", &self.descriptor).finish_non_exhaustive()
    }
}

impl<A, V, E> CachedFn<A, V, E>
where
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(
        controller: Arc<Controller<V>>,
        descriptor: Arc<KeyDescriptor<A>>,
        fallback: Fallback<A, V, E>,
        bridge: Arc<EventLoopPool>,
    ) -> Self {
        Self {
            controller,
            descriptor,
            fallback,
            bridge,
        }
    }

    /// Calls the function through the cache.
    ///
    /// # Errors
    ///
    /// Only the underlying function's error, unchanged. Cache failures of
    /// any kind degrade the call to an uncached one.
    pub async fn call(&self, args: A) -> Result<V, E> {
        let key = self.descriptor.build_key(&args);
        let fallback = Arc::clone(&self.fallback);
        self.controller.execute(key, move || fallback(args)).await
    }

    /// Calls the function through the cache from synchronous code.
    ///
    /// The call is dispatched to a bridge worker and joined; the caller's
    /// enable scope at this point is the one the worker observes. Blocks
    /// the calling thread, so invoking this from an async task stalls its
    /// event loop; that earns a warning, and the remedy is [`call`](Self::call).
    ///
    /// # Errors
    ///
    /// The underlying function's error, or a bridge error converted through
    /// `E: From<Error>`: [`Error::ReentrantSyncCall`] when invoked from
    /// inside another sync cached call, or [`Error::Bridge`] when the pool
    /// is stopped.
    pub fn call_blocking(&self, args: A) -> Result<V, E>
    where
        V: 'static,
        E: From<Error>,
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            tracing::warn!(
                use_case = %self.descriptor.use_case(),
                "sync cached function called from async context; this blocks the event loop, \
                 consider using the async form instead"
            );
        }

        let this = self.clone();
        match self.bridge.submit(async move { this.call(args).await }) {
            Ok(result) => result,
            Err(e) => Err(E::from(e)),
        }
    }

    /// The descriptor this function was registered with.
    #[must_use]
    pub fn descriptor(&self) -> &KeyDescriptor<A> {
        &self.descriptor
    }
}
