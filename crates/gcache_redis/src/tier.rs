// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The shared tier: serialize, store with TTL, filter by watermark.

use std::sync::Arc;
use std::time::Duration;

use tick::Clock;

use gcache_tier::{
    CacheKey, CacheLayer, CacheTier, Error, GcacheTelemetry, Lookup, SerializationDirection, Serializer,
};

use crate::envelope::{self, Envelope};
use crate::store::RemoteStore;
use crate::watermark::{epoch_ms, parse_watermark};

/// Shared network tier for one registered use case.
///
/// Values travel as [`Envelope`]s: payload bytes from the use case's
/// serializer plus the creation timestamp compared against the entity
/// watermark. For keys tracked for invalidation, the envelope and the
/// watermark are fetched in a single batched round-trip.
pub struct RemoteTier<V> {
    store: Arc<dyn RemoteStore>,
    serializer: Arc<dyn Serializer<V>>,
    telemetry: GcacheTelemetry,
    clock: Clock,
}

impl<V> Clone for RemoteTier<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            serializer: Arc::clone(&self.serializer),
            telemetry: self.telemetry.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<V> std::fmt::Debug for RemoteTier<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RemoteTier")
    }
}

impl<V> RemoteTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a remote tier over a byte store and a value serializer.
    #[must_use]
    pub fn new(
        store: Arc<dyn RemoteStore>,
        serializer: Arc<dyn Serializer<V>>,
        telemetry: GcacheTelemetry,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            serializer,
            telemetry,
            clock,
        }
    }
}

impl<V> CacheTier<V> for RemoteTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn layer(&self) -> CacheLayer {
        CacheLayer::Remote
    }

    async fn get(&self, key: &CacheKey) -> Result<Lookup<V>, Error> {
        tracing::debug!(key = %key, "querying shared tier");

        let (envelope_bytes, watermark_bytes) = if key.invalidation_tracking() {
            let urn = key.urn();
            let watermark_key = key.watermark_key();
            self.store.get_with_watermark(&urn, &watermark_key).await?
        } else {
            (self.store.get(&key.urn()).await?, None)
        };

        let watermark_ms = watermark_bytes.as_deref().and_then(parse_watermark);

        let Some(bytes) = envelope_bytes else {
            return Ok(Lookup::Miss { watermark_ms });
        };

        let watch = tick::Stopwatch::new(&self.clock);
        let envelope = envelope::decode(bytes).await?;
        let value = self.serializer.deserialize(&envelope.payload)?;
        self.telemetry.record_serialization(
            key.use_case(),
            key.key_type(),
            SerializationDirection::Deserialize,
            watch.elapsed(),
        );

        // An envelope at or below the watermark was invalidated; it reads as
        // a miss and is left for TTL to reclaim.
        if let Some(watermark_ms) = watermark_ms
            && watermark_ms >= envelope.created_at_ms
        {
            return Ok(Lookup::Miss {
                watermark_ms: Some(watermark_ms),
            });
        }

        Ok(Lookup::Hit(value))
    }

    async fn put(&self, key: &CacheKey, value: &V, ttl: Duration) -> Result<(), Error> {
        let created_at_ms = epoch_ms(&self.clock);

        let watch = tick::Stopwatch::new(&self.clock);
        let payload = self.serializer.serialize(value)?;
        let bytes = envelope::encode(Envelope { created_at_ms, payload }).await?;
        self.telemetry.record_serialization(
            key.use_case(),
            key.key_type(),
            SerializationDirection::Serialize,
            watch.elapsed(),
        );
        self.telemetry.record_size(key.use_case(), key.key_type(), bytes.len() as u64);

        self.store.set_ex(&key.urn(), bytes, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, Error> {
        self.store.delete(&key.urn()).await
    }

    async fn clear(&self) -> Result<(), Error> {
        self.store.flushall().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::UNIX_EPOCH;

    use gcache_tier::BincodeSerializer;

    use crate::testing::{FailingStore, InMemoryStore};
    use crate::watermark::write_watermark;

    fn clock_at_ms(ms: u64) -> (tick::ClockControl, Clock) {
        let control = tick::ClockControl::new_at(UNIX_EPOCH + Duration::from_millis(ms));
        let clock = control.to_clock();
        (control, clock)
    }

    fn tier(store: Arc<InMemoryStore>, clock: &Clock) -> RemoteTier<String> {
        RemoteTier::new(
            store,
            Arc::new(BincodeSerializer::new()),
            GcacheTelemetry::disabled(clock.clone()),
            clock.clone(),
        )
    }

    fn tracked_key(id: &str) -> CacheKey {
        CacheKey::new("user_id", id, "uc", vec![], true)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_control, clock) = clock_at_ms(1_000_000);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let tier = tier(Arc::clone(&store), &clock);
        let key = tracked_key("42");

        tier.put(&key, &"value".to_string(), Duration::from_secs(300))
            .await
            .expect("put should succeed");
        assert_eq!(
            tier.get(&key).await.expect("get should succeed"),
            Lookup::Hit("value".to_string())
        );
    }

    #[tokio::test]
    async fn watermark_filters_older_envelopes() {
        let (control, clock) = clock_at_ms(1_000_000);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let tier = tier(Arc::clone(&store), &clock);
        let key = tracked_key("42");

        tier.put(&key, &"stale".to_string(), Duration::from_secs(300))
            .await
            .expect("put should succeed");

        control.advance(Duration::from_millis(10));
        write_watermark(store.as_ref(), &clock, "user_id", "42", 0)
            .await
            .expect("watermark write should succeed");

        let lookup = tier.get(&key).await.expect("get should succeed");
        assert_eq!(
            lookup,
            Lookup::Miss {
                watermark_ms: Some(1_000_010)
            }
        );
        // The stale envelope is filtered, not deleted.
        assert!(store.contains(&key.urn()));
    }

    #[tokio::test]
    async fn envelopes_created_after_the_watermark_read_fresh() {
        let (control, clock) = clock_at_ms(1_000_000);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let tier = tier(Arc::clone(&store), &clock);
        let key = tracked_key("42");

        write_watermark(store.as_ref(), &clock, "user_id", "42", 0)
            .await
            .expect("watermark write should succeed");

        control.advance(Duration::from_millis(5));
        tier.put(&key, &"fresh".to_string(), Duration::from_secs(300))
            .await
            .expect("put should succeed");

        assert_eq!(
            tier.get(&key).await.expect("get should succeed"),
            Lookup::Hit("fresh".to_string())
        );
    }

    #[tokio::test]
    async fn untracked_keys_skip_the_watermark() {
        let (control, clock) = clock_at_ms(1_000_000);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let tier = tier(Arc::clone(&store), &clock);
        let key = CacheKey::new("user_id", "42", "uc", vec![], false);

        tier.put(&key, &"value".to_string(), Duration::from_secs(300))
            .await
            .expect("put should succeed");

        control.advance(Duration::from_millis(10));
        write_watermark(store.as_ref(), &clock, "user_id", "42", 0)
            .await
            .expect("watermark write should succeed");

        // Untracked reads never consult the watermark.
        assert_eq!(
            tier.get(&key).await.expect("get should succeed"),
            Lookup::Hit("value".to_string())
        );
    }

    #[tokio::test]
    async fn miss_reports_watermark_for_store_suppression() {
        let (_control, clock) = clock_at_ms(1_000_000);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let tier = tier(Arc::clone(&store), &clock);
        let key = tracked_key("42");

        write_watermark(store.as_ref(), &clock, "user_id", "42", 5_000)
            .await
            .expect("watermark write should succeed");

        assert_eq!(
            tier.get(&key).await.expect("get should succeed"),
            Lookup::Miss {
                watermark_ms: Some(1_005_000)
            }
        );
    }

    #[tokio::test]
    async fn transport_failures_surface_as_errors() {
        let (_control, clock) = clock_at_ms(0);
        let tier: RemoteTier<String> = RemoteTier::new(
            Arc::new(FailingStore),
            Arc::new(BincodeSerializer::new()),
            GcacheTelemetry::disabled(clock.clone()),
            clock.clone(),
        );
        let key = tracked_key("42");

        let err = tier.get(&key).await.expect_err("failing store should error");
        assert!(matches!(err, Error::Transport(_)));
    }
}
