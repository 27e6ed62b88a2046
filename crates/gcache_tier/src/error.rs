// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::error::Error as StdError;

/// Direction of a serialization failure, used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationDirection {
    /// Value was being serialized for storage.
    Serialize,
    /// Stored bytes were being deserialized back into a value.
    Deserialize,
}

impl SerializationDirection {
    /// Returns the metric label value for this direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Serialize => "ser",
            Self::Deserialize => "de",
        }
    }
}

/// An error from a cache operation.
///
/// Every variant maps onto one branch of the recovery policy: everything up
/// to and including [`Error::Serialization`] is recovered internally (the
/// request proceeds as if caching were disabled for that call), while the
/// construction- and registration-time variants are surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Cache key could not be built from the call arguments.
    #[error("could not construct cache key: {0}")]
    KeyBuild(String),

    /// No configuration was found for a use case and no default was registered.
    #[error("missing entire or partial (ttl/ramp) key config for use case: {use_case}")]
    ConfigAbsent {
        /// Use case whose configuration is missing.
        use_case: String,
    },

    /// Shared-tier I/O failed.
    #[error("shared tier transport error: {0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),

    /// Value or envelope (de)serialization failed.
    #[error("{} failed: {cause}", direction.as_str())]
    Serialization {
        /// Which half of the codec failed.
        direction: SerializationDirection,
        /// Underlying codec error.
        #[source]
        cause: Box<dyn StdError + Send + Sync>,
    },

    /// A sync cached function was invoked transitively inside a bridge worker.
    #[error(
        "sync cached function calling another sync cached function detected; \
         this is not supported for sync functions, convert the inner use case to async"
    )]
    ReentrantSyncCall,

    /// The bridge pool could not run the submitted call.
    #[error("bridge unavailable: {0}")]
    Bridge(String),

    /// A second facade was constructed while the first is still live.
    #[error("a GCache instance already exists in this process")]
    SingletonViolation,

    /// Both a fixed redis config and a client factory were supplied.
    #[error("cannot provide both redis_config and redis_client_factory, only one is allowed")]
    ConflictingRedisConfig,

    /// A descriptor used the reserved `watermark` use case.
    #[error("use case name is reserved")]
    ReservedUseCase,

    /// Two registrations used the same use case name.
    #[error("use case already registered: {0}")]
    UseCaseAlreadyRegistered(String),
}

impl Error {
    /// Creates a key-build error from any displayable cause.
    pub fn key_build(cause: impl std::fmt::Display) -> Self {
        Self::KeyBuild(cause.to_string())
    }

    /// Creates a transport error wrapping a source error.
    pub fn transport(cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Transport(cause.into())
    }

    /// Creates a serialization error for the given direction.
    pub fn serialization(
        direction: SerializationDirection,
        cause: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Serialization {
            direction,
            cause: cause.into(),
        }
    }

    /// Creates a bridge error from any displayable cause.
    pub fn bridge(cause: impl std::fmt::Display) -> Self {
        Self::Bridge(cause.to_string())
    }
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
