// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::metrics::{Counter, Histogram, Meter};

pub(crate) fn create_request_counter(meter: &Meter, prefix: &str) -> Counter<u64> {
    meter
        .u64_counter(format!("{prefix}gcache_request_counter"))
        .with_description("Cache request counter")
        .with_unit("{request}")
        .build()
}

pub(crate) fn create_miss_counter(meter: &Meter, prefix: &str) -> Counter<u64> {
    meter
        .u64_counter(format!("{prefix}gcache_miss_counter"))
        .with_description("Cache miss counter")
        .with_unit("{miss}")
        .build()
}

pub(crate) fn create_disabled_counter(meter: &Meter, prefix: &str) -> Counter<u64> {
    meter
        .u64_counter(format!("{prefix}gcache_disabled_counter"))
        .with_description("Cache disabled counter")
        .with_unit("{call}")
        .build()
}

pub(crate) fn create_error_counter(meter: &Meter, prefix: &str) -> Counter<u64> {
    meter
        .u64_counter(format!("{prefix}gcache_error_counter"))
        .with_description("Cache error counter")
        .with_unit("{error}")
        .build()
}

pub(crate) fn create_invalidation_counter(meter: &Meter, prefix: &str) -> Counter<u64> {
    meter
        .u64_counter(format!("{prefix}gcache_invalidation_counter"))
        .with_description("Cache invalidation counter")
        .with_unit("{invalidation}")
        .build()
}

pub(crate) fn create_get_timer(meter: &Meter, prefix: &str) -> Histogram<f64> {
    meter
        .f64_histogram(format!("{prefix}gcache_get_timer"))
        .with_description("Cache get timer")
        .with_unit("s")
        .build()
}

pub(crate) fn create_fallback_timer(meter: &Meter, prefix: &str) -> Histogram<f64> {
    meter
        .f64_histogram(format!("{prefix}gcache_fallback_timer"))
        .with_description("Fallback timer")
        .with_unit("s")
        .build()
}

pub(crate) fn create_serialization_timer(meter: &Meter, prefix: &str) -> Histogram<f64> {
    meter
        .f64_histogram(format!("{prefix}gcache_serialization_timer"))
        .with_description("Cache serialization timer")
        .with_unit("s")
        .build()
}

pub(crate) fn create_size_histogram(meter: &Meter, prefix: &str) -> Histogram<u64> {
    meter
        .u64_histogram(format!("{prefix}gcache_size_histogram"))
        .with_description("Cache size histogram")
        .with_unit("By")
        .build()
}
