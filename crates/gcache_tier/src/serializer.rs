// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Value serialization for the shared tier.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result, SerializationDirection};

/// Converts values to and from shared-tier bytes.
///
/// One serializer is attached per use case; the default is
/// [`BincodeSerializer`]. A custom implementation must return a value
/// matching the registered function's return type, otherwise callers get
/// runtime type errors on cache hits.
pub trait Serializer<V>: Send + Sync {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] on codec failure; the cache treats
    /// that as a skipped store, never a caller error.
    fn serialize(&self, value: &V) -> Result<Vec<u8>>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] on codec failure; the cache treats
    /// that as a miss.
    fn deserialize(&self, bytes: &[u8]) -> Result<V>;
}

/// The default binary serializer, backed by bincode.
pub struct BincodeSerializer<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for BincodeSerializer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BincodeSerializer")
    }
}

impl<V> Default for BincodeSerializer<V> {
    fn default() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<V> BincodeSerializer<V> {
    /// Creates a new bincode serializer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<V> Serializer<V> for BincodeSerializer<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn serialize(&self, value: &V) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| Error::serialization(SerializationDirection::Serialize, e))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<V> {
        bincode::deserialize(bytes).map_err(|e| Error::serialization(SerializationDirection::Deserialize, e))
    }
}
