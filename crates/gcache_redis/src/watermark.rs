// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Watermark writes and timestamp helpers.
//!
//! A watermark is a single millisecond timestamp per `(key_type, id)`.
//! Writing one invalidates every tracked envelope for that entity in O(1):
//! reads compare the envelope's `created_at_ms` against the watermark and
//! filter stale entries, which are then reclaimed by TTL.

use std::time::{Duration, UNIX_EPOCH};

use tick::Clock;

use gcache_tier::{Result, key};

use crate::store::RemoteStore;

/// TTL for watermark keys. Must exceed the longest envelope TTL in use:
/// once a watermark expires, envelopes it invalidated would read as fresh
/// again if they were still alive. Deployments with envelope TTLs beyond
/// four hours must raise this.
pub const WATERMARK_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Milliseconds since the Unix epoch on the given clock.
///
/// This is the timebase for envelope timestamps and watermarks.
#[must_use]
pub fn epoch_ms(clock: &Clock) -> u64 {
    clock
        .system_time()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Parses a stored watermark value.
///
/// Watermarks are written as decimal text; earlier writers emitted floats,
/// so parsing is tolerant of a fractional part.
#[must_use]
pub(crate) fn parse_watermark(bytes: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(bytes).ok()?;
    let value = text.trim().parse::<f64>().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value as u64)
    } else {
        None
    }
}

/// Writes a watermark for `(key_type, id)` dated `buffer_ms` into the
/// future.
///
/// The buffer extends the invalidation horizon so reads that were in flight
/// when the invalidation happened cannot repopulate the entity with stale
/// data. Racing invalidators resolve by the higher timestamp at read time.
pub async fn write_watermark(
    store: &dyn RemoteStore,
    clock: &Clock,
    key_type: &str,
    id: &str,
    buffer_ms: u64,
) -> Result<()> {
    let watermark_key = key::watermark_key(key_type, id);
    let stamp = epoch_ms(clock).saturating_add(buffer_ms);
    store
        .set_ex(&watermark_key, stamp.to_string().into_bytes(), WATERMARK_TTL)
        .await
}
