// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared fixtures for the integration suite.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, UNIX_EPOCH};

use opentelemetry::metrics::{Meter, MeterProvider};
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};
use tick::{Clock, ClockControl};

use gcache::{GCache, GCacheConfig, KeyConfig, StaticConfigSource};
use gcache_redis::testing::InMemoryStore;

/// Serializes tests that construct the process-wide facade.
pub fn serial() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Collects OTel metrics in memory and answers value queries by instrument
/// name and attribute subset.
pub struct MetricTester {
    exporter: InMemoryMetricExporter,
    provider: SdkMeterProvider,
}

impl MetricTester {
    pub fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build();
        Self { exporter, provider }
    }

    pub fn meter(&self) -> Meter {
        self.provider.meter("gcache-tests")
    }

    fn latest(&self) -> Option<ResourceMetrics> {
        self.provider.force_flush().expect("flush should succeed");
        self.exporter
            .get_finished_metrics()
            .expect("metrics should export")
            .pop()
    }

    fn attrs_match(point_attrs: &[(String, String)], wanted: &[(&str, &str)]) -> bool {
        wanted
            .iter()
            .all(|(k, v)| point_attrs.iter().any(|(pk, pv)| pk == k && pv == v))
    }

    /// Sum of a u64 counter across data points whose attributes contain all
    /// of `attrs`.
    pub fn counter_value(&self, name: &str, attrs: &[(&str, &str)]) -> u64 {
        let mut total = 0;
        let Some(resource) = self.latest() else { return 0 };
        for scope in resource.scope_metrics() {
            for metric in scope.metrics() {
                if metric.name() != name {
                    continue;
                }
                if let AggregatedMetrics::U64(MetricData::Sum(sum)) = metric.data() {
                    for point in sum.data_points() {
                        let point_attrs: Vec<(String, String)> = point
                            .attributes()
                            .map(|kv| (kv.key.to_string(), kv.value.to_string()))
                            .collect();
                        if Self::attrs_match(&point_attrs, attrs) {
                            total += point.value();
                        }
                    }
                }
            }
        }
        total
    }

    /// `(count, sum)` of an f64 histogram across data points whose
    /// attributes contain all of `attrs`.
    pub fn histogram_value(&self, name: &str, attrs: &[(&str, &str)]) -> (u64, f64) {
        let mut count = 0;
        let mut sum = 0.0;
        let Some(resource) = self.latest() else { return (0, 0.0) };
        for scope in resource.scope_metrics() {
            for metric in scope.metrics() {
                if metric.name() != name {
                    continue;
                }
                if let AggregatedMetrics::F64(MetricData::Histogram(histogram)) = metric.data() {
                    for point in histogram.data_points() {
                        let point_attrs: Vec<(String, String)> = point
                            .attributes()
                            .map(|kv| (kv.key.to_string(), kv.value.to_string()))
                            .collect();
                        if Self::attrs_match(&point_attrs, attrs) {
                            count += point.count();
                            sum += point.sum();
                        }
                    }
                }
            }
        }
        (count, sum)
    }
}

/// A facade wired to an in-memory shared tier and a controllable clock.
pub struct Harness {
    pub gcache: GCache,
    pub store: Arc<InMemoryStore>,
    pub control: ClockControl,
    pub clock: Clock,
    pub metrics: MetricTester,
}

/// Builds a facade over an in-memory shared store, frozen at a fixed
/// timestamp, publishing metrics with the default `api_` prefix.
pub fn harness(configs: impl IntoIterator<Item = (&'static str, KeyConfig)>) -> Harness {
    let control = ClockControl::new_at(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    let clock = control.to_clock();
    let store = Arc::new(InMemoryStore::new(clock.clone()));
    let metrics = MetricTester::new();

    let source = StaticConfigSource::new(configs.into_iter().map(|(uc, cfg)| (uc.to_string(), cfg)));
    let gcache = GCache::new(
        GCacheConfig::builder(source, clock.clone())
            .meter(metrics.meter())
            .remote_store(store.clone() as Arc<dyn gcache_redis::RemoteStore>)
            .build(),
    )
    .expect("facade should construct");

    Harness {
        gcache,
        store,
        control,
        clock,
        metrics,
    }
}

/// A facade with no shared tier at all.
pub fn local_only_harness(configs: impl IntoIterator<Item = (&'static str, KeyConfig)>) -> Harness {
    let control = ClockControl::new_at(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    let clock = control.to_clock();
    let store = Arc::new(InMemoryStore::new(clock.clone()));
    let metrics = MetricTester::new();

    let source = StaticConfigSource::new(configs.into_iter().map(|(uc, cfg)| (uc.to_string(), cfg)));
    let gcache = GCache::new(
        GCacheConfig::builder(source, clock.clone())
            .meter(metrics.meter())
            .build(),
    )
    .expect("facade should construct");

    Harness {
        gcache,
        store,
        control,
        clock,
        metrics,
    }
}

/// Standard two-layer config: LOCAL ttl 60s, REMOTE ttl 300s, both fully
/// ramped.
pub fn both_layers() -> KeyConfig {
    KeyConfig::load(
        r#"{"ttl_sec": {"local": 60, "remote": 300}, "ramp": {"local": 100, "remote": 100}}"#,
    )
    .expect("config literal should parse")
}
