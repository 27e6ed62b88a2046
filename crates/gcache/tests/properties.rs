// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Universal properties: disabled-by-default, ramp bounds, fail-open, and
//! timer semantics.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use gcache::scope;
use gcache::{GCache, GCacheConfig};
use gcache_redis::testing::FailingStore;
use gcache_tier::{Error, KeyConfig, KeyDescriptor, StaticConfigSource};

use common::{both_layers, harness};

fn user_descriptor(use_case: &'static str) -> KeyDescriptor<String> {
    KeyDescriptor::<String>::builder("user_id", use_case)
        .id(|id: &String| id.clone())
        .build()
}

#[tokio::test]
async fn outside_an_enable_scope_nothing_is_cached() {
    let _serial = common::serial();
    let h = harness([("prop.disabled", both_layers())]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cached = h
        .gcache
        .cached(user_descriptor("prop.disabled"), move |id: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Error>(id) }
        })
        .expect("registration should succeed");

    for _ in 0..3 {
        cached.call("42".to_string()).await.expect("call should succeed");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3, "every call must run the fallback");
    assert!(h.store.is_empty(), "no tier may be written outside a scope");
    assert_eq!(
        h.metrics.counter_value(
            "api_gcache_disabled_counter",
            &[("use_case", "prop.disabled"), ("reason", "not_enabled")]
        ),
        3
    );
    assert_eq!(h.metrics.counter_value("api_gcache_miss_counter", &[("use_case", "prop.disabled")]), 0);
}

#[tokio::test]
async fn an_explicitly_disabling_scope_reports_its_own_reason() {
    let _serial = common::serial();
    let h = harness([("prop.explicit", both_layers())]);
    let cached = h
        .gcache
        .cached(user_descriptor("prop.explicit"), |id: String| async move {
            Ok::<_, Error>(id)
        })
        .expect("registration should succeed");

    scope::scoped(false, async {
        cached.call("42".to_string()).await.expect("call should succeed");
    })
    .await;

    assert_eq!(
        h.metrics.counter_value(
            "api_gcache_disabled_counter",
            &[("use_case", "prop.explicit"), ("reason", "explicitly_disabled")]
        ),
        1
    );
}

#[tokio::test]
async fn ramp_zero_never_consults_a_layer_and_hundred_always_does() {
    let _serial = common::serial();
    let config = KeyConfig::load(
        r#"{"ttl_sec": {"local": 60, "remote": 300}, "ramp": {"local": 0, "remote": 100}}"#,
    )
    .expect("config should parse");
    let h = harness([("prop.rampbounds", config)]);
    let cached = h
        .gcache
        .cached(user_descriptor("prop.rampbounds"), |id: String| async move {
            Ok::<_, Error>(id)
        })
        .expect("registration should succeed");

    const N: usize = 50;
    scope::scoped(true, async {
        for i in 0..N {
            cached.call(i.to_string()).await.expect("call should succeed");
        }
    })
    .await;

    assert_eq!(
        h.metrics.counter_value(
            "api_gcache_disabled_counter",
            &[("use_case", "prop.rampbounds"), ("reason", "ramped_off"), ("layer", "LOCAL")]
        ),
        N as u64,
        "ramp 0 must decline every call"
    );
    assert_eq!(
        h.metrics.counter_value(
            "api_gcache_miss_counter",
            &[("use_case", "prop.rampbounds"), ("layer", "REMOTE")]
        ),
        N as u64,
        "ramp 100 must consult the layer on every call"
    );
    assert_eq!(
        h.metrics.counter_value(
            "api_gcache_miss_counter",
            &[("use_case", "prop.rampbounds"), ("layer", "LOCAL")]
        ),
        0
    );
}

#[tokio::test]
async fn a_dead_shared_tier_degrades_to_the_bare_function() {
    let _serial = common::serial();
    let metrics = common::MetricTester::new();
    let control = tick::ClockControl::new();
    let source = StaticConfigSource::new([("prop.failopen".to_string(), both_layers())]);
    let gcache = GCache::new(
        GCacheConfig::builder(source, control.to_clock())
            .meter(metrics.meter())
            .remote_store(Arc::new(FailingStore))
            .build(),
    )
    .expect("facade should construct");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cached = gcache
        .cached(user_descriptor("prop.failopen"), move |id: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Error>(format!("{id}-ok")) }
        })
        .expect("registration should succeed");

    scope::scoped(true, async {
        let value = cached.call("7".to_string()).await.expect("call must not surface cache errors");
        assert_eq!(value, "7-ok");
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(
        metrics.counter_value(
            "api_gcache_error_counter",
            &[("use_case", "prop.failopen"), ("stage", "shared_get")]
        ) >= 1
    );
    assert!(
        metrics.counter_value(
            "api_gcache_error_counter",
            &[("use_case", "prop.failopen"), ("stage", "shared_set")]
        ) >= 1
    );
}

#[tokio::test]
async fn fallback_errors_pass_through_and_are_not_cached() {
    let _serial = common::serial();
    let h = harness([("prop.fallback_err", both_layers())]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cached = h
        .gcache
        .cached(user_descriptor("prop.fallback_err"), move |id: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::bridge("fallback exploded"))
                } else {
                    Ok(id)
                }
            }
        })
        .expect("registration should succeed");

    scope::scoped(true, async {
        let err = cached.call("42".to_string()).await.expect_err("first call must propagate");
        assert!(matches!(err, Error::Bridge(_)));
        assert!(h.store.is_empty(), "a failed fallback must not be stored");

        let ok = cached.call("42".to_string()).await.expect("second call should succeed");
        assert_eq!(ok, "42");
    })
    .await;
}

#[tokio::test]
async fn get_timer_excludes_fallback_time() {
    let _serial = common::serial();
    let h = harness([("prop.timer", both_layers())]);
    let control = h.control.clone();
    let cached = h
        .gcache
        .cached(user_descriptor("prop.timer"), move |id: String| {
            let control = control.clone();
            // Simulate a slow fallback by advancing the frozen clock while
            // the fallback future runs.
            async move {
                control.advance(Duration::from_millis(100));
                Ok::<_, Error>(id)
            }
        })
        .expect("registration should succeed");

    scope::scoped(true, async {
        cached.call("42".to_string()).await.expect("call should succeed");
    })
    .await;

    let (fallback_count, fallback_sum) =
        h.metrics.histogram_value("api_gcache_fallback_timer", &[("use_case", "prop.timer")]);
    assert_eq!(fallback_count, 1);
    assert!(fallback_sum >= 0.1, "fallback timer must capture the fallback delay, got {fallback_sum}");

    let (get_count, get_sum) = h.metrics.histogram_value("api_gcache_get_timer", &[("use_case", "prop.timer")]);
    assert_eq!(get_count, 2, "one lookup per consulted layer");
    assert!(get_sum < 0.1, "get timer must not include fallback time, got {get_sum}");
}

#[tokio::test]
async fn missing_config_without_default_bypasses_the_cache() {
    let _serial = common::serial();
    let h = harness([("prop.other", both_layers())]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cached = h
        .gcache
        .cached(user_descriptor("prop.noconfig"), move |id: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Error>(id) }
        })
        .expect("registration should succeed");

    scope::scoped(true, async {
        cached.call("42".to_string()).await.expect("call should succeed");
        cached.call("42".to_string()).await.expect("call should succeed");
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(h.store.is_empty());
    assert_eq!(
        h.metrics.counter_value(
            "api_gcache_disabled_counter",
            &[("use_case", "prop.noconfig"), ("reason", "no_config")]
        ),
        2
    );
}

#[tokio::test]
async fn descriptor_default_config_applies_when_the_oracle_has_none() {
    let _serial = common::serial();
    let h = harness([("prop.other", both_layers())]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cached = h
        .gcache
        .cached(
            KeyDescriptor::<String>::builder("user_id", "prop.default")
                .id(|id: &String| id.clone())
                .default_config(both_layers())
                .build(),
            move |id: String| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, Error>(id) }
            },
        )
        .expect("registration should succeed");

    scope::scoped(true, async {
        cached.call("42".to_string()).await.expect("call should succeed");
        cached.call("42".to_string()).await.expect("call should succeed");
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1, "default config must enable caching");
}

#[tokio::test]
async fn key_build_failure_bypasses_and_counts() {
    let _serial = common::serial();
    let h = harness([("prop.keyerr", both_layers())]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cached = h
        .gcache
        .cached(
            KeyDescriptor::<String>::builder("user_id", "prop.keyerr")
                .try_id(|_: &String| Err(Error::key_build("id extraction failed")))
                .build(),
            move |id: String| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, Error>(id) }
            },
        )
        .expect("registration should succeed");

    scope::scoped(true, async {
        let value = cached.call("42".to_string()).await.expect("call should succeed");
        assert_eq!(value, "42");
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.metrics.counter_value(
            "api_gcache_disabled_counter",
            &[("use_case", "prop.keyerr"), ("reason", "key_error")]
        ),
        1
    );
    assert_eq!(
        h.metrics.counter_value(
            "api_gcache_error_counter",
            &[("use_case", "prop.keyerr"), ("stage", "key_build")]
        ),
        1
    );
}
