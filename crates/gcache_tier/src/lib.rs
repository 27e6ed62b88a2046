// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core types for the gcache read-through cache: the structured key model,
//! per-use-case configuration, the tier trait, value serialization, and the
//! shared metrics facade.
//!
//! This crate holds everything the tier backends and the user-facing crate
//! have in common. It contains no I/O; backends live in `gcache_memory` and
//! `gcache_redis`, and the controller, chain, and facade live in `gcache`.
//!
//! # Examples
//!
//! ```
//! use gcache_tier::CacheKey;
//!
//! let key = CacheKey::new(
//!     "user_id",
//!     "42",
//!     "profile.load",
//!     vec![("locale".to_string(), "en-US".to_string())],
//!     false,
//! );
//! assert_eq!(key.urn(), "urn:user_id:42?locale=en-US#profile.load");
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod key;
pub mod serializer;
mod telemetry;
pub mod tier;

#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use config::{
    CacheLayer, ConfigSource, KeyConfig, KeyConfigEntry, KeyConfigs, StaticConfigSource, dump_configs, load_configs,
};
#[doc(inline)]
pub use descriptor::{KeyDescriptor, KeyDescriptorBuilder};
#[doc(inline)]
pub use error::{Error, Result, SerializationDirection};
#[doc(inline)]
pub use key::CacheKey;
#[doc(inline)]
pub use serializer::{BincodeSerializer, Serializer};
#[doc(inline)]
pub use telemetry::{DisabledReason, ErrorStage, GcacheTelemetry};
#[doc(inline)]
pub use tier::{CacheTier, Lookup};

/// The use case name reserved for watermark keys; user registrations may
/// not claim it.
pub const RESERVED_USE_CASE: &str = "watermark";
