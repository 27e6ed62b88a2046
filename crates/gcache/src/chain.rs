// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The read-through cache chain.
//!
//! Tiers are consulted in order (local, then remote); the first hit
//! populates all earlier tiers and returns. Writes after a fallback go to
//! every participating tier. Every tier failure is fail-open: logged,
//! counted, and treated as a miss or a skipped store.

use std::time::Duration;

use tick::Clock;

use gcache_memory::LocalTier;
use gcache_redis::{RemoteTier, epoch_ms};
use gcache_tier::{
    CacheKey, CacheLayer, CacheTier, Error, ErrorStage, GcacheTelemetry, Lookup, SerializationDirection,
};

use crate::timing::ClockExt;

/// The shared arm of the chain: a redis tier, or nothing when the facade
/// was built without a remote backend.
pub(crate) enum RemoteArm<V> {
    Redis(RemoteTier<V>),
    Noop,
}

/// Which tiers participate in one call, with their TTLs.
///
/// Participation for a layer is the conjunction of config presence and a
/// passed ramp draw; the controller decides it before the chain runs.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ChainPlan {
    pub local_ttl: Option<Duration>,
    pub remote_ttl: Option<Duration>,
}

impl ChainPlan {
    pub(crate) fn is_empty(&self) -> bool {
        self.local_ttl.is_none() && self.remote_ttl.is_none()
    }
}

/// What a chain read produced.
pub(crate) struct ReadOutcome<V> {
    pub value: Option<V>,
    /// Watermark reported by the remote tier, used to suppress the
    /// post-fallback remote store during an invalidation window.
    pub remote_watermark_ms: Option<u64>,
}

fn read_error_stage(error: &Error) -> ErrorStage {
    match error {
        Error::Serialization {
            direction: SerializationDirection::Deserialize,
            ..
        } => ErrorStage::De,
        _ => ErrorStage::SharedGet,
    }
}

fn write_error_stage(error: &Error) -> ErrorStage {
    match error {
        Error::Serialization {
            direction: SerializationDirection::Serialize,
            ..
        } => ErrorStage::Ser,
        _ => ErrorStage::SharedSet,
    }
}

pub(crate) struct CacheChain<V>
where
    V: Clone + Send + Sync + 'static,
{
    local: LocalTier<V>,
    remote: RemoteArm<V>,
    telemetry: GcacheTelemetry,
    clock: Clock,
}

impl<V> CacheChain<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(local: LocalTier<V>, remote: RemoteArm<V>, telemetry: GcacheTelemetry, clock: Clock) -> Self {
        Self {
            local,
            remote,
            telemetry,
            clock,
        }
    }

    pub(crate) fn has_remote(&self) -> bool {
        matches!(self.remote, RemoteArm::Redis(_))
    }

    /// Reads through the tiers in order. A remote hit is promoted into the
    /// local tier when the local layer participates in this call.
    pub(crate) async fn read(&self, key: &CacheKey, plan: &ChainPlan) -> ReadOutcome<V> {
        if plan.local_ttl.is_some() {
            let timed = self.clock.timed_async(self.local.get(key)).await;
            self.telemetry
                .record_get(key.use_case(), key.key_type(), CacheLayer::Local, timed.duration);
            match timed.result {
                Ok(Lookup::Hit(value)) => {
                    return ReadOutcome {
                        value: Some(value),
                        remote_watermark_ms: None,
                    };
                }
                Ok(Lookup::Miss { .. }) => {
                    self.telemetry.record_miss(key.use_case(), key.key_type(), CacheLayer::Local);
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "local tier read failed");
                    self.telemetry.record_miss(key.use_case(), key.key_type(), CacheLayer::Local);
                }
            }
        }

        let mut remote_watermark_ms = None;
        if let (RemoteArm::Redis(tier), Some(_)) = (&self.remote, plan.remote_ttl) {
            let timed = self.clock.timed_async(tier.get(key)).await;
            self.telemetry
                .record_get(key.use_case(), key.key_type(), CacheLayer::Remote, timed.duration);
            match timed.result {
                Ok(Lookup::Hit(value)) => {
                    if let Some(local_ttl) = plan.local_ttl
                        && let Err(e) = self.local.put(key, &value, local_ttl).await
                    {
                        tracing::error!(key = %key, error = %e, "local tier promotion failed");
                    }
                    return ReadOutcome {
                        value: Some(value),
                        remote_watermark_ms: None,
                    };
                }
                Ok(Lookup::Miss { watermark_ms }) => {
                    self.telemetry.record_miss(key.use_case(), key.key_type(), CacheLayer::Remote);
                    remote_watermark_ms = watermark_ms;
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "shared tier read failed");
                    self.telemetry.record_error(key.use_case(), key.key_type(), read_error_stage(&e));
                }
            }
        }

        ReadOutcome {
            value: None,
            remote_watermark_ms,
        }
    }

    /// Stores a fallback result in every participating tier.
    ///
    /// The remote store is skipped while a forward-dated watermark covers
    /// the entity, so a value read during an invalidation window cannot be
    /// cached as fresh.
    pub(crate) async fn populate(&self, key: &CacheKey, value: &V, plan: &ChainPlan, remote_watermark_ms: Option<u64>) {
        if let Some(local_ttl) = plan.local_ttl
            && let Err(e) = self.local.put(key, value, local_ttl).await
        {
            tracing::error!(key = %key, error = %e, "local tier store failed");
        }

        if let (RemoteArm::Redis(tier), Some(remote_ttl)) = (&self.remote, plan.remote_ttl) {
            let now_ms = epoch_ms(&self.clock);
            if remote_watermark_ms.is_some_and(|watermark| watermark > now_ms) {
                tracing::debug!(key = %key, "invalidation window active, skipping shared tier store");
                return;
            }
            if let Err(e) = tier.put(key, value, remote_ttl).await {
                tracing::error!(key = %key, error = %e, "shared tier store failed");
                self.telemetry.record_error(key.use_case(), key.key_type(), write_error_stage(&e));
            }
        }
    }

}
