// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Key descriptors: how a cache key is derived from call arguments.
//!
//! A descriptor is attached at registration time and is generic over the
//! registered function's argument type. The id extractor pulls the entity
//! identity out of the arguments; arg adapters stringify the incidental
//! arguments that should distinguish cached results. Arguments without an
//! adapter are simply ignored, which is how `ignore_args` is expressed in a
//! typed language.

use crate::config::KeyConfig;
use crate::error::{Error, Result};
use crate::key::CacheKey;

type Extractor<A> = Box<dyn Fn(&A) -> Result<String> + Send + Sync>;

/// Describes how to build a [`CacheKey`] from a call's arguments.
///
/// # Examples
///
/// ```
/// use gcache_tier::KeyDescriptor;
///
/// struct Args {
///     user_id: u64,
///     locale: String,
/// }
///
/// let descriptor = KeyDescriptor::<Args>::builder("user_id", "profile.load")
///     .id(|a| a.user_id.to_string())
///     .arg("locale", |a| a.locale.clone())
///     .track_for_invalidation()
///     .build();
///
/// let key = descriptor
///     .build_key(&Args { user_id: 42, locale: "en-US".into() })
///     .unwrap();
/// assert_eq!(key.urn(), "{urn:user_id:42}?locale=en-US#profile.load");
/// ```
pub struct KeyDescriptor<A> {
    key_type: String,
    use_case: String,
    id: Extractor<A>,
    adapters: Vec<(String, Extractor<A>)>,
    track_for_invalidation: bool,
    default_config: Option<KeyConfig>,
}

impl<A> std::fmt::Debug for KeyDescriptor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDescriptor")
            .field("key_type", &self.key_type)
            .field("use_case", &self.use_case)
            .field("args", &self.adapters.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("track_for_invalidation", &self.track_for_invalidation)
            .finish_non_exhaustive()
    }
}

impl<A> KeyDescriptor<A> {
    /// Starts building a descriptor for the given entity family and use case.
    #[must_use]
    pub fn builder(key_type: impl Into<String>, use_case: impl Into<String>) -> KeyDescriptorBuilder<A> {
        KeyDescriptorBuilder {
            key_type: key_type.into(),
            use_case: use_case.into(),
            id: None,
            adapters: Vec::new(),
            track_for_invalidation: false,
            default_config: None,
        }
    }

    /// The entity family this descriptor keys on.
    #[must_use]
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// The unique use case name for this registration.
    #[must_use]
    pub fn use_case(&self) -> &str {
        &self.use_case
    }

    /// Whether keys built from this descriptor consult invalidation watermarks.
    #[must_use]
    pub fn track_for_invalidation(&self) -> bool {
        self.track_for_invalidation
    }

    /// The config used when the oracle returns nothing for this use case.
    #[must_use]
    pub fn default_config(&self) -> Option<&KeyConfig> {
        self.default_config.as_ref()
    }

    /// Builds the cache key for one call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyBuild`] when the id extractor or any adapter
    /// fails; the controller treats that as a bypass, never as a caller
    /// error.
    pub fn build_key(&self, args: &A) -> Result<CacheKey> {
        let id = (self.id)(args)?;
        let mut key_args = Vec::with_capacity(self.adapters.len());
        for (name, adapter) in &self.adapters {
            key_args.push((name.clone(), adapter(args)?));
        }
        Ok(CacheKey::new(
            self.key_type.clone(),
            id,
            self.use_case.clone(),
            key_args,
            self.track_for_invalidation,
        ))
    }
}

/// Builder for [`KeyDescriptor`].
pub struct KeyDescriptorBuilder<A> {
    key_type: String,
    use_case: String,
    id: Option<Extractor<A>>,
    adapters: Vec<(String, Extractor<A>)>,
    track_for_invalidation: bool,
    default_config: Option<KeyConfig>,
}

impl<A> KeyDescriptorBuilder<A> {
    /// Sets an infallible id extractor.
    #[must_use]
    pub fn id<F, S>(mut self, extract: F) -> Self
    where
        F: Fn(&A) -> S + Send + Sync + 'static,
        S: Into<String>,
    {
        self.id = Some(Box::new(move |args| Ok(extract(args).into())));
        self
    }

    /// Sets a fallible id extractor. A failure bypasses the cache for that
    /// call and counts a key-build error.
    #[must_use]
    pub fn try_id<F>(mut self, extract: F) -> Self
    where
        F: Fn(&A) -> Result<String> + Send + Sync + 'static,
    {
        self.id = Some(Box::new(extract));
        self
    }

    /// Adds an infallible arg adapter. Adapter order does not matter; args
    /// are sorted by name when the key is built.
    #[must_use]
    pub fn arg<F, S>(mut self, name: impl Into<String>, adapt: F) -> Self
    where
        F: Fn(&A) -> S + Send + Sync + 'static,
        S: Into<String>,
    {
        self.adapters.push((name.into(), Box::new(move |args| Ok(adapt(args).into()))));
        self
    }

    /// Adds a fallible arg adapter.
    #[must_use]
    pub fn try_arg<F>(mut self, name: impl Into<String>, adapt: F) -> Self
    where
        F: Fn(&A) -> Result<String> + Send + Sync + 'static,
    {
        self.adapters.push((name.into(), Box::new(adapt)));
        self
    }

    /// Marks keys from this descriptor for watermark-based invalidation.
    #[must_use]
    pub fn track_for_invalidation(mut self) -> Self {
        self.track_for_invalidation = true;
        self
    }

    /// Sets the config applied when the oracle has none for this use case.
    #[must_use]
    pub fn default_config(mut self, config: KeyConfig) -> Self {
        self.default_config = Some(config);
        self
    }

    /// Finishes the descriptor.
    ///
    /// A missing id extractor is a programming error surfaced on first call
    /// as a key-build failure rather than a panic, so a misconfigured
    /// registration degrades to an uncached function.
    #[must_use]
    pub fn build(self) -> KeyDescriptor<A> {
        let id = self.id.unwrap_or_else(|| {
            Box::new(|_| Err(Error::key_build("descriptor has no id extractor")))
        });
        KeyDescriptor {
            key_type: self.key_type,
            use_case: self.use_case,
            id,
            adapters: self.adapters,
            track_for_invalidation: self.track_for_invalidation,
            default_config: self.default_config,
        }
    }
}
