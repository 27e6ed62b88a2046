// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The shared-tier value envelope.
//!
//! Stored values carry the timestamp they were created at so that watermark
//! invalidation can filter stale entries at read time without deleting
//! anything.

use serde::{Deserialize, Serialize};

use gcache_tier::{Error, Result, SerializationDirection};

/// Payloads at or above this size are encoded and decoded on the blocking
/// pool so a multi-hundred-kilobyte value does not stall the event loop.
pub(crate) const OFFLOAD_THRESHOLD_BYTES: usize = 50_000;

/// Wire wrapper around a cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    /// Unix timestamp in milliseconds when this value was cached. Compared
    /// against the entity watermark on every tracked read.
    pub created_at_ms: u64,
    /// Serialized payload bytes, produced by the use case's serializer.
    pub payload: Vec<u8>,
}

fn encode_sync(envelope: &Envelope) -> Result<Vec<u8>> {
    bincode::serialize(envelope).map_err(|e| Error::serialization(SerializationDirection::Serialize, e))
}

fn decode_sync(bytes: &[u8]) -> Result<Envelope> {
    bincode::deserialize(bytes).map_err(|e| Error::serialization(SerializationDirection::Deserialize, e))
}

fn offload_possible() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

pub(crate) async fn encode(envelope: Envelope) -> Result<Vec<u8>> {
    if envelope.payload.len() >= OFFLOAD_THRESHOLD_BYTES && offload_possible() {
        tokio::task::spawn_blocking(move || encode_sync(&envelope))
            .await
            .map_err(|e| Error::serialization(SerializationDirection::Serialize, e))?
    } else {
        encode_sync(&envelope)
    }
}

pub(crate) async fn decode(bytes: Vec<u8>) -> Result<Envelope> {
    if bytes.len() >= OFFLOAD_THRESHOLD_BYTES && offload_possible() {
        tokio::task::spawn_blocking(move || decode_sync(&bytes))
            .await
            .map_err(|e| Error::serialization(SerializationDirection::Deserialize, e))?
    } else {
        decode_sync(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_inline() {
        let envelope = Envelope {
            created_at_ms: 1_700_000_000_000,
            payload: b"small".to_vec(),
        };
        let bytes = encode(envelope.clone()).await.expect("encode should succeed");
        assert_eq!(decode(bytes).await.expect("decode should succeed"), envelope);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn round_trips_a_large_payload_off_the_loop() {
        let envelope = Envelope {
            created_at_ms: 1,
            payload: vec![0xab; OFFLOAD_THRESHOLD_BYTES * 2],
        };
        let bytes = encode(envelope.clone()).await.expect("encode should succeed");
        assert!(bytes.len() > OFFLOAD_THRESHOLD_BYTES);
        assert_eq!(decode(bytes).await.expect("decode should succeed"), envelope);
    }

    #[tokio::test]
    async fn garbage_fails_as_deserialization() {
        let err = decode(vec![0xff; 4]).await.expect_err("garbage should fail");
        assert!(matches!(
            err,
            Error::Serialization {
                direction: SerializationDirection::Deserialize,
                ..
            }
        ));
    }
}
