// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The structured cache key and its canonical URN form.
//!
//! A key binds a cached result to an entity identity (`key_type` + `id`)
//! distinct from the incidental call arguments, which enables targeted
//! invalidation and per-use-case metrics.

use std::fmt;

use parking_lot::RwLock;
use pct_str::{Encoder, PctString};

static URN_PREFIX: RwLock<Option<String>> = RwLock::new(None);

const DEFAULT_URN_PREFIX: &str = "urn";

/// Sets the process-wide URN prefix used when rendering keys.
///
/// Called by the facade during construction. The prefix defaults to `urn`,
/// which yields the historical `urn:...` key head expected by deployed
/// consumers.
pub fn set_urn_prefix(prefix: impl Into<String>) {
    *URN_PREFIX.write() = Some(prefix.into());
}

/// Resets the URN prefix to its default. Called on facade teardown.
pub fn reset_urn_prefix() {
    *URN_PREFIX.write() = None;
}

fn urn_prefix() -> String {
    URN_PREFIX
        .read()
        .clone()
        .unwrap_or_else(|| DEFAULT_URN_PREFIX.to_string())
}

/// Escapes everything outside the RFC 3986 unreserved set, which is
/// stricter than the reserved-only sets: argument values must not be able
/// to forge the `?`/`&`/`=`/`#` structure of the canonical form.
struct ArgValueEncoder;

impl Encoder for ArgValueEncoder {
    fn encode(&self, c: char) -> bool {
        !matches!(c, 'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '.' | '_' | '~')
    }
}

/// Percent-escapes a key argument value.
///
/// Key and arg names are caller-controlled identifiers and are not escaped.
fn escape_value(value: &str) -> PctString {
    PctString::encode(value.chars(), ArgValueEncoder)
}

/// Returns the watermark key for an entity.
///
/// Watermark keys derive from `(key_type, id)` only, independent of use case
/// and arguments. The `{...}` hash-tag forces same-shard co-location with
/// tracked envelope keys so both can be fetched in one batched round-trip on
/// a cluster.
#[must_use]
pub fn watermark_key(key_type: &str, id: &str) -> String {
    format!("{{{}:{}:{}}}#watermark", urn_prefix(), key_type, id)
}

/// An immutable, hashable cache key.
///
/// Two calls of the same registered function with the same effective
/// `(key_type, id, args, use_case)` produce equal keys and identical
/// canonical strings. Changing `id` alone changes the invalidation scope and
/// nothing else.
///
/// # Examples
///
/// ```
/// use gcache_tier::CacheKey;
///
/// let key = CacheKey::new(
///     "user_id",
///     "42",
///     "profile.load",
///     vec![("locale".to_string(), "en-US".to_string())],
///     false,
/// );
/// assert_eq!(key.urn(), "urn:user_id:42?locale=en-US#profile.load");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key_type: String,
    id: String,
    use_case: String,
    /// Sorted lexicographically by name; the canonical form depends on it.
    args: Vec<(String, String)>,
    invalidation_tracking: bool,
}

impl CacheKey {
    /// Creates a new key. `args` must already be sorted by name; the
    /// constructor sorts defensively so hand-built keys stay canonical.
    #[must_use]
    pub fn new(
        key_type: impl Into<String>,
        id: impl Into<String>,
        use_case: impl Into<String>,
        mut args: Vec<(String, String)>,
        invalidation_tracking: bool,
    ) -> Self {
        args.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            key_type: key_type.into(),
            id: id.into(),
            use_case: use_case.into(),
            args,
            invalidation_tracking,
        }
    }

    /// The logical entity family, e.g. `user_id`.
    #[must_use]
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// The entity identity within the `key_type` family.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The caching scenario this key belongs to.
    #[must_use]
    pub fn use_case(&self) -> &str {
        &self.use_case
    }

    /// The sorted, stringified call arguments.
    #[must_use]
    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    /// Whether shared-tier reads of this key consult the invalidation watermark.
    #[must_use]
    pub fn invalidation_tracking(&self) -> bool {
        self.invalidation_tracking
    }

    /// The entity portion of the key: `<prefix>:<key_type>:<id>`, wrapped in
    /// a cluster hash-tag when the key is tracked for invalidation.
    #[must_use]
    pub fn entity_prefix(&self) -> String {
        let prefix = format!("{}:{}:{}", urn_prefix(), self.key_type, self.id);
        if self.invalidation_tracking {
            format!("{{{prefix}}}")
        } else {
            prefix
        }
    }

    /// The watermark key guarding this entity on the shared tier.
    #[must_use]
    pub fn watermark_key(&self) -> String {
        watermark_key(&self.key_type, &self.id)
    }

    /// The canonical wire form of this key:
    /// `urn:<prefix>:<key_type>:<id>?<name>=<value>&...#<use_case>`.
    #[must_use]
    pub fn urn(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = self.entity_prefix();
        for (i, (name, value)) in self.args.iter().enumerate() {
            out.push(if i == 0 { '?' } else { '&' });
            out.push_str(name);
            out.push('=');
            out.push_str(escape_value(value).as_str());
        }
        out.push('#');
        out.push_str(&self.use_case);
        f.write_str(&out)
    }
}
