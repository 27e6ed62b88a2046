// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared redis tier and watermark invalidation for the gcache read-through
//! cache.
//!
//! The shared tier stores serialized values wrapped in envelopes carrying a
//! creation timestamp. Invalidation never deletes entries: it writes a
//! single watermark per `(key_type, id)` and every tracked read filters
//! envelopes whose timestamp is at or below it. All transport operations
//! are fail-open at the layer above: an unreachable server degrades the
//! cache to a pass-through, never to a caller-visible error.

mod config;
mod conn;
mod envelope;
mod store;
mod tier;
mod watermark;

#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use config::RedisConfig;
#[doc(inline)]
pub use conn::RedisConn;
#[doc(inline)]
pub use store::{ConnectionFactory, RedisStore, RemoteStore, default_client_factory};
#[doc(inline)]
pub use tier::RemoteTier;
#[doc(inline)]
pub use watermark::{WATERMARK_TTL, epoch_ms, write_watermark};
