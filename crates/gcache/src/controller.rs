// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-request cache policy.
//!
//! One controller exists per registered function. It owns the policy order:
//! request accounting, enable-scope check, key build, config resolution,
//! per-layer ramp decision, chain read, fallback with timing, and
//! population of participating tiers. Fallback errors pass through
//! untouched; cache errors never reach the caller.

use std::sync::Arc;

use rand::Rng;
use tick::Clock;

use gcache_tier::{
    CacheKey, CacheLayer, ConfigSource, DisabledReason, ErrorStage, GcacheTelemetry, KeyConfig, Result,
};

use crate::chain::{CacheChain, ChainPlan};
use crate::scope;
use crate::timing::ClockExt;

pub(crate) struct Controller<V>
where
    V: Clone + Send + Sync + 'static,
{
    use_case: String,
    key_type: String,
    default_config: Option<KeyConfig>,
    chain: CacheChain<V>,
    config_source: Arc<dyn ConfigSource>,
    telemetry: GcacheTelemetry,
    clock: Clock,
}

impl<V> Controller<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        use_case: String,
        key_type: String,
        default_config: Option<KeyConfig>,
        chain: CacheChain<V>,
        config_source: Arc<dyn ConfigSource>,
        telemetry: GcacheTelemetry,
        clock: Clock,
    ) -> Self {
        Self {
            use_case,
            key_type,
            default_config,
            chain,
            config_source,
            telemetry,
            clock,
        }
    }

    /// Runs one cached call.
    ///
    /// `key` is the pre-built cache key for the call's arguments; a build
    /// failure bypasses to the fallback after accounting for it. The
    /// fallback runs at most once and its error type passes through
    /// unchanged.
    pub(crate) async fn execute<E, Fut>(
        &self,
        key: Result<CacheKey>,
        fallback: impl FnOnce() -> Fut,
    ) -> std::result::Result<V, E>
    where
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        self.telemetry.record_request(&self.use_case, &self.key_type);

        match scope::current_state() {
            Some(true) => {}
            state => {
                self.record_out_of_scope(state);
                return fallback().await;
            }
        }

        let key = match key {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(use_case = %self.use_case, error = %e, "could not construct cache key");
                self.telemetry.record_error(&self.use_case, &self.key_type, ErrorStage::KeyBuild);
                self.telemetry
                    .record_disabled(&self.use_case, &self.key_type, DisabledReason::KeyError, None);
                return fallback().await;
            }
        };

        let Some(config) = self.resolve_config(&key).await else {
            self.telemetry
                .record_disabled(&self.use_case, &self.key_type, DisabledReason::NoConfig, None);
            return fallback().await;
        };

        let plan = self.plan(&config);
        if plan.is_empty() {
            return fallback().await;
        }

        let outcome = self.chain.read(&key, &plan).await;
        if let Some(value) = outcome.value {
            return Ok(value);
        }

        let timed = self.clock.timed_async(fallback()).await;
        self.telemetry.record_fallback(&self.use_case, &self.key_type, timed.duration);
        let value = timed.result?;

        self.chain.populate(&key, &value, &plan, outcome.remote_watermark_ms).await;
        Ok(value)
    }

    fn record_out_of_scope(&self, state: Option<bool>) {
        let reason = if state == Some(false) {
            DisabledReason::ExplicitlyDisabled
        } else {
            DisabledReason::NotEnabled
        };
        self.telemetry.record_disabled(&self.use_case, &self.key_type, reason, None);
    }

    async fn resolve_config(&self, key: &CacheKey) -> Option<KeyConfig> {
        match self.config_source.lookup(key).await {
            Ok(Some(config)) => Some(config),
            Ok(None) => self.default_config.clone(),
            Err(e) => {
                tracing::error!(use_case = %self.use_case, error = %e, "config lookup failed");
                self.telemetry.record_error(&self.use_case, &self.key_type, ErrorStage::Config);
                self.default_config.clone()
            }
        }
    }

    fn plan(&self, config: &KeyConfig) -> ChainPlan {
        ChainPlan {
            local_ttl: self.layer_participation(config, CacheLayer::Local),
            remote_ttl: if self.chain.has_remote() {
                self.layer_participation(config, CacheLayer::Remote)
            } else {
                None
            },
        }
    }

    /// Decides whether a layer participates in this call: it must have both
    /// a TTL and a ramp configured, and the ramp draw must pass. Ramp 0
    /// always declines, 100 always participates; in between, a uniform draw
    /// in `[1, 100]` gates the call.
    fn layer_participation(&self, config: &KeyConfig, layer: CacheLayer) -> Option<std::time::Duration> {
        let (Some(ttl), Some(ramp)) = (config.ttl_for(layer), config.ramp_for(layer)) else {
            self.telemetry
                .record_disabled(&self.use_case, &self.key_type, DisabledReason::NoConfig, Some(layer));
            return None;
        };

        let participates = match ramp {
            0 => false,
            ramp if ramp >= 100 => true,
            ramp => rand::thread_rng().gen_range(1..=100) <= ramp,
        };

        if participates {
            Some(ttl)
        } else {
            self.telemetry
                .record_disabled(&self.use_case, &self.key_type, DisabledReason::RampedOff, Some(layer));
            None
        }
    }
}

impl<V> std::fmt::Debug for Controller<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("use_case", &self.use_case)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use gcache_memory::LocalTier;
    use gcache_tier::{CacheKey, StaticConfigSource};

    use crate::chain::RemoteArm;

    fn controller(configs: Vec<(&str, KeyConfig)>) -> Controller<String> {
        let clock = Clock::new_frozen();
        let telemetry = GcacheTelemetry::disabled(clock.clone());
        let chain = CacheChain::new(
            LocalTier::new(100),
            RemoteArm::Noop,
            telemetry.clone(),
            clock.clone(),
        );
        Controller::new(
            "uc".to_string(),
            "user_id".to_string(),
            None,
            chain,
            Arc::new(StaticConfigSource::new(
                configs.into_iter().map(|(k, v)| (k.to_string(), v)),
            )),
            telemetry,
            clock,
        )
    }

    fn local_only(ramp: u8) -> KeyConfig {
        KeyConfig {
            ttl_sec: HashMap::from([(CacheLayer::Local, 60)]),
            ramp: HashMap::from([(CacheLayer::Local, ramp)]),
        }
    }

    fn key() -> CacheKey {
        CacheKey::new("user_id", "1", "uc", vec![], false)
    }

    #[test]
    fn bypasses_outside_any_scope() {
        futures::executor::block_on(async {
            let controller = controller(vec![("uc", local_only(100))]);

            let mut runs = 0;
            for _ in 0..2 {
                let value: std::result::Result<String, std::convert::Infallible> = controller
                    .execute(Ok(key()), || {
                        runs += 1;
                        async { Ok("fresh".to_string()) }
                    })
                    .await;
                assert_eq!(value.expect("fallback result"), "fresh");
            }
            assert_eq!(runs, 2, "nothing may be cached outside a scope");
        });
    }

    #[test]
    fn caches_under_an_enabled_scope() {
        futures::executor::block_on(crate::scope::scoped(true, async {
            let controller = controller(vec![("uc", local_only(100))]);

            let mut runs = 0;
            for _ in 0..3 {
                let value: std::result::Result<String, std::convert::Infallible> = controller
                    .execute(Ok(key()), || {
                        runs += 1;
                        async { Ok("fresh".to_string()) }
                    })
                    .await;
                assert_eq!(value.expect("cached result"), "fresh");
            }
            assert_eq!(runs, 1, "later calls must hit the local tier");
        }));
    }

    #[test]
    fn ramp_zero_disables_the_layer() {
        futures::executor::block_on(crate::scope::scoped(true, async {
            let controller = controller(vec![("uc", local_only(0))]);

            let mut runs = 0;
            for _ in 0..3 {
                let _: std::result::Result<String, std::convert::Infallible> = controller
                    .execute(Ok(key()), || {
                        runs += 1;
                        async { Ok("fresh".to_string()) }
                    })
                    .await;
            }
            assert_eq!(runs, 3, "ramp 0 must never consult the layer");
        }));
    }

    #[test]
    fn missing_config_without_default_bypasses() {
        futures::executor::block_on(crate::scope::scoped(true, async {
            let controller = controller(vec![]);

            let mut runs = 0;
            for _ in 0..2 {
                let _: std::result::Result<String, std::convert::Infallible> = controller
                    .execute(Ok(key()), || {
                        runs += 1;
                        async { Ok("fresh".to_string()) }
                    })
                    .await;
            }
            assert_eq!(runs, 2);
        }));
    }

    #[test]
    fn key_build_failure_falls_back() {
        futures::executor::block_on(crate::scope::scoped(true, async {
            let controller = controller(vec![("uc", local_only(100))]);

            let value: std::result::Result<String, std::convert::Infallible> = controller
                .execute(Err(gcache_tier::Error::key_build("no id")), || async {
                    Ok("fresh".to_string())
                })
                .await;
            assert_eq!(value.expect("fallback result"), "fresh");
        }));
    }
}
