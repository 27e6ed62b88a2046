// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-use-case cache configuration: TTL and ramp per tier.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key::CacheKey;

/// Identifies a cache tier.
///
/// `Noop` stands in for the shared tier when no remote backend is
/// configured; it never participates in reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLayer {
    /// Process-local in-memory tier.
    #[serde(alias = "LOCAL")]
    Local,
    /// Shared network tier.
    #[serde(alias = "REMOTE")]
    Remote,
    /// Placeholder tier that performs no caching.
    #[serde(alias = "NOOP")]
    Noop,
}

impl CacheLayer {
    /// Returns the metric label value for this layer.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Remote => "REMOTE",
            Self::Noop => "NOOP",
        }
    }
}

/// TTL and ramp configuration for one use case.
///
/// A layer missing from either map is disabled for calls under this config.
/// Ramp is a per-call Bernoulli gate in percent: 0 deterministically
/// disables the layer, 100 deterministically enables it, and intermediate
/// values gate each call on a uniform draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Time-to-live in seconds per layer.
    pub ttl_sec: HashMap<CacheLayer, u64>,
    /// Participation percentage in `[0, 100]` per layer.
    pub ramp: HashMap<CacheLayer, u8>,
}

impl KeyConfig {
    /// Returns a config that enables every layer at the given TTL with full ramp.
    ///
    /// # Examples
    ///
    /// ```
    /// use gcache_tier::{CacheLayer, KeyConfig};
    ///
    /// let config = KeyConfig::enabled(300);
    /// assert_eq!(config.ramp_for(CacheLayer::Remote), Some(100));
    /// ```
    #[must_use]
    pub fn enabled(ttl_sec: u64) -> Self {
        let layers = [CacheLayer::Local, CacheLayer::Remote, CacheLayer::Noop];
        Self {
            ttl_sec: layers.iter().map(|l| (*l, ttl_sec)).collect(),
            ramp: layers.iter().map(|l| (*l, 100)).collect(),
        }
    }

    /// Returns the configured TTL for a layer, if present.
    #[must_use]
    pub fn ttl_for(&self, layer: CacheLayer) -> Option<Duration> {
        self.ttl_sec.get(&layer).map(|secs| Duration::from_secs(*secs))
    }

    /// Returns the configured ramp for a layer, if present.
    #[must_use]
    pub fn ramp_for(&self, layer: CacheLayer) -> Option<u8> {
        self.ramp.get(&layer).copied()
    }

    /// Parses a config from its JSON representation.
    ///
    /// Layer keys are accepted in either case (`"local"` or `"LOCAL"`),
    /// matching configs written by earlier deployments.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error when the document does not
    /// match the config shape.
    pub fn load(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    /// Renders this config as JSON.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error on serialization failure.
    pub fn dump(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A config collection entry: either a single config, or a map of
/// environment name to config for per-environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyConfigEntry {
    /// One config applied everywhere.
    Single(KeyConfig),
    /// Environment name to config.
    PerEnvironment(HashMap<String, KeyConfig>),
}

/// A collection of configs keyed by use case.
pub type KeyConfigs = HashMap<String, KeyConfigEntry>;

/// Loads a collection of configs, keyed by use case, from JSON.
///
/// # Errors
///
/// Returns the underlying `serde_json` error when the document does not
/// match the collection shape.
pub fn load_configs(data: &str) -> serde_json::Result<KeyConfigs> {
    serde_json::from_str(data)
}

/// Dumps a collection of configs, keyed by use case, as pretty JSON.
///
/// # Errors
///
/// Returns the underlying `serde_json` error on serialization failure.
pub fn dump_configs(configs: &KeyConfigs) -> serde_json::Result<String> {
    serde_json::to_string_pretty(configs)
}

/// The configuration oracle consulted for every cached call.
///
/// Implementations may be backed by a dynamic config system; lookups run on
/// the hot path and should be cheap. Errors and `None` results are treated
/// identically by the controller: the descriptor's default config applies,
/// and if there is none the call bypasses the cache.
pub trait ConfigSource: Send + Sync + 'static {
    /// Looks up the config for a key, returning `None` when absent.
    fn lookup<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<KeyConfig>>>;
}

/// A [`ConfigSource`] over a fixed map of use case to config.
///
/// # Examples
///
/// ```
/// use gcache_tier::{KeyConfig, StaticConfigSource};
///
/// let source = StaticConfigSource::new([("profile.load".to_string(), KeyConfig::enabled(60))]);
/// ```
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    configs: HashMap<String, KeyConfig>,
}

impl StaticConfigSource {
    /// Creates a source from `(use_case, config)` pairs.
    pub fn new(configs: impl IntoIterator<Item = (String, KeyConfig)>) -> Self {
        Self {
            configs: configs.into_iter().collect(),
        }
    }
}

impl ConfigSource for StaticConfigSource {
    fn lookup<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<KeyConfig>>> {
        Box::pin(async move { Ok(self.configs.get(key.use_case()).cloned()) })
    }
}
