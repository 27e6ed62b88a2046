// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache telemetry built on OpenTelemetry metrics.
//!
//! Every instrument carries `use_case` and `key_type` attributes; cache-path
//! instruments additionally carry `layer`. All instrument names share a
//! configurable prefix so multiple services can publish side by side.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use tick::Clock;

use crate::config::CacheLayer;

mod attributes;
mod metrics;

/// Why a call bypassed the cache, used as the `reason` attribute on the
/// disabled counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledReason {
    /// No enable scope was active for the call.
    NotEnabled,
    /// An `enable(false)` scope was active for the call.
    ExplicitlyDisabled,
    /// The ramp draw declined the layer.
    RampedOff,
    /// Neither the oracle nor the descriptor provided a config.
    NoConfig,
    /// The cache key could not be built from the arguments.
    KeyError,
}

impl DisabledReason {
    /// Returns the metric label value for this reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotEnabled => "not_enabled",
            Self::ExplicitlyDisabled => "explicitly_disabled",
            Self::RampedOff => "ramped_off",
            Self::NoConfig => "no_config",
            Self::KeyError => "key_error",
        }
    }
}

/// Which stage produced a recovered error, used as the `stage` attribute on
/// the error counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    /// Key construction from call arguments.
    KeyBuild,
    /// Shared-tier read.
    SharedGet,
    /// Shared-tier write.
    SharedSet,
    /// Watermark read or write.
    Watermark,
    /// Value serialization.
    Ser,
    /// Value deserialization.
    De,
    /// Configuration oracle lookup.
    Config,
}

impl ErrorStage {
    /// Returns the metric label value for this stage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeyBuild => "key_build",
            Self::SharedGet => "shared_get",
            Self::SharedSet => "shared_set",
            Self::Watermark => "watermark",
            Self::Ser => "ser",
            Self::De => "de",
            Self::Config => "config",
        }
    }
}

#[derive(Debug)]
struct TelemetryInner {
    clock: Clock,
    request_counter: Option<Counter<u64>>,
    miss_counter: Option<Counter<u64>>,
    disabled_counter: Option<Counter<u64>>,
    error_counter: Option<Counter<u64>>,
    invalidation_counter: Option<Counter<u64>>,
    get_timer: Option<Histogram<f64>>,
    fallback_timer: Option<Histogram<f64>>,
    serialization_timer: Option<Histogram<f64>>,
    size_histogram: Option<Histogram<u64>>,
}

/// Metrics facade shared by the controller and the cache tiers.
///
/// Constructed once per facade from an optional OpenTelemetry meter; with no
/// meter every record call is a no-op, so the hot path never branches on a
/// feature flag.
#[derive(Clone, Debug)]
pub struct GcacheTelemetry {
    inner: Arc<TelemetryInner>,
}

impl GcacheTelemetry {
    /// Creates a telemetry facade.
    ///
    /// # Arguments
    ///
    /// * `meter` - OpenTelemetry meter to register instruments on, if any
    /// * `prefix` - prepended to every instrument name, e.g. `api_`
    /// * `clock` - clock used for operation timing
    #[must_use]
    pub fn new(meter: Option<&Meter>, prefix: &str, clock: Clock) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                clock,
                request_counter: meter.map(|m| metrics::create_request_counter(m, prefix)),
                miss_counter: meter.map(|m| metrics::create_miss_counter(m, prefix)),
                disabled_counter: meter.map(|m| metrics::create_disabled_counter(m, prefix)),
                error_counter: meter.map(|m| metrics::create_error_counter(m, prefix)),
                invalidation_counter: meter.map(|m| metrics::create_invalidation_counter(m, prefix)),
                get_timer: meter.map(|m| metrics::create_get_timer(m, prefix)),
                fallback_timer: meter.map(|m| metrics::create_fallback_timer(m, prefix)),
                serialization_timer: meter.map(|m| metrics::create_serialization_timer(m, prefix)),
                size_histogram: meter.map(|m| metrics::create_size_histogram(m, prefix)),
            }),
        }
    }

    /// Returns the clock used for timing cache operations.
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    fn base_attrs(use_case: &str, key_type: &str) -> Vec<KeyValue> {
        vec![
            KeyValue::new(attributes::USE_CASE, use_case.to_string()),
            KeyValue::new(attributes::KEY_TYPE, key_type.to_string()),
        ]
    }

    /// Records one cached-call request.
    pub fn record_request(&self, use_case: &str, key_type: &str) {
        if let Some(c) = &self.inner.request_counter {
            c.add(1, &Self::base_attrs(use_case, key_type));
        }
    }

    /// Records a miss on one layer.
    pub fn record_miss(&self, use_case: &str, key_type: &str, layer: CacheLayer) {
        if let Some(c) = &self.inner.miss_counter {
            let mut attrs = Self::base_attrs(use_case, key_type);
            attrs.push(KeyValue::new(attributes::LAYER, layer.as_str()));
            c.add(1, &attrs);
        }
    }

    /// Records a bypass decision. `layer` is set for per-layer reasons
    /// (ramp, missing layer config) and absent for whole-call reasons.
    pub fn record_disabled(&self, use_case: &str, key_type: &str, reason: DisabledReason, layer: Option<CacheLayer>) {
        if let Some(c) = &self.inner.disabled_counter {
            let mut attrs = Self::base_attrs(use_case, key_type);
            attrs.push(KeyValue::new(attributes::REASON, reason.as_str()));
            if let Some(layer) = layer {
                attrs.push(KeyValue::new(attributes::LAYER, layer.as_str()));
            }
            c.add(1, &attrs);
        }
    }

    /// Records a recovered error at the given stage.
    pub fn record_error(&self, use_case: &str, key_type: &str, stage: ErrorStage) {
        if let Some(c) = &self.inner.error_counter {
            let mut attrs = Self::base_attrs(use_case, key_type);
            attrs.push(KeyValue::new(attributes::STAGE, stage.as_str()));
            c.add(1, &attrs);
        }
    }

    /// Records one invalidation for an entity family.
    pub fn record_invalidation(&self, key_type: &str) {
        if let Some(c) = &self.inner.invalidation_counter {
            c.add(1, &[KeyValue::new(attributes::KEY_TYPE, key_type.to_string())]);
        }
    }

    /// Records the lookup latency of one layer. This timer never includes
    /// fallback execution time.
    pub fn record_get(&self, use_case: &str, key_type: &str, layer: CacheLayer, duration: Duration) {
        if let Some(h) = &self.inner.get_timer {
            let mut attrs = Self::base_attrs(use_case, key_type);
            attrs.push(KeyValue::new(attributes::LAYER, layer.as_str()));
            h.record(duration.as_secs_f64(), &attrs);
        }
    }

    /// Records the wall time of the underlying function.
    pub fn record_fallback(&self, use_case: &str, key_type: &str, duration: Duration) {
        if let Some(h) = &self.inner.fallback_timer {
            h.record(duration.as_secs_f64(), &Self::base_attrs(use_case, key_type));
        }
    }

    /// Records codec time for one direction on the shared tier.
    pub fn record_serialization(
        &self,
        use_case: &str,
        key_type: &str,
        direction: crate::error::SerializationDirection,
        duration: Duration,
    ) {
        if let Some(h) = &self.inner.serialization_timer {
            let mut attrs = Self::base_attrs(use_case, key_type);
            attrs.push(KeyValue::new(attributes::DIRECTION, direction.as_str()));
            h.record(duration.as_secs_f64(), &attrs);
        }
    }

    /// Records the serialized size of a shared-tier write.
    pub fn record_size(&self, use_case: &str, key_type: &str, bytes: u64) {
        if let Some(h) = &self.inner.size_histogram {
            h.record(bytes, &Self::base_attrs(use_case, key_type));
        }
    }

    /// A telemetry facade that records nothing. Convenient for tests and
    /// for tiers constructed before the facade exists.
    #[must_use]
    pub fn disabled(clock: Clock) -> Self {
        Self::new(None, "", clock)
    }
}
