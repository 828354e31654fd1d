//! The set of limiter policies owned by one process.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::clock::Clock;
use super::policy::{LimiterConfig, LimiterPolicy};
use super::rules::{resolve_rule, PolicyKind};
use super::store::{CounterStore, MemoryStore};
use crate::config::RateLimitingConfig;
use crate::error::Result;

/// The four admission policies, each with its own counter table.
///
/// Built once at startup and shared behind an `Arc`. Policies never share
/// counters; which of them applies to a request is decided by the caller.
pub struct LimiterRegistry {
    policies: BTreeMap<PolicyKind, Arc<LimiterPolicy>>,
    idle_windows: u64,
}

impl LimiterRegistry {
    /// Build the registry with in-memory counter stores.
    pub fn new(config: &RateLimitingConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_store_factory(config, clock, |_| Arc::new(MemoryStore::new()))
    }

    /// Build the registry, asking `make_store` for each policy's counter store.
    pub fn with_store_factory<F>(
        config: &RateLimitingConfig,
        clock: Arc<dyn Clock>,
        mut make_store: F,
    ) -> Result<Self>
    where
        F: FnMut(PolicyKind) -> Arc<dyn CounterStore>,
    {
        let mut policies = BTreeMap::new();

        for kind in PolicyKind::ALL {
            let rule = resolve_rule(kind, &config.policies)?;
            let mut limiter_config = LimiterConfig::from_rule(&rule);

            if kind == PolicyKind::General {
                let health_path = config.health_check_path.clone();
                limiter_config = limiter_config.with_bypass(move |req| req.path == health_path);
            }

            let policy = LimiterPolicy::new(
                kind.as_str(),
                limiter_config,
                make_store(kind),
                Arc::clone(&clock),
            )?;

            debug!(
                policy = %kind,
                window_ms = rule.window_ms,
                limit = rule.max_requests,
                "Limiter policy configured"
            );
            policies.insert(kind, Arc::new(policy));
        }

        Ok(Self {
            policies,
            idle_windows: config.idle_windows.max(1),
        })
    }

    /// Policy for `kind`. Every kind is always present.
    pub fn get(&self, kind: PolicyKind) -> &Arc<LimiterPolicy> {
        &self.policies[&kind]
    }

    pub fn iter(&self) -> impl Iterator<Item = (PolicyKind, &Arc<LimiterPolicy>)> {
        self.policies.iter().map(|(kind, policy)| (*kind, policy))
    }

    /// Evict counters idle for `idle_windows` windows in every policy.
    ///
    /// Returns the total number of evicted keys.
    pub fn sweep(&self) -> usize {
        self.policies
            .iter()
            .map(|(kind, policy)| {
                let now_ms = policy.clock().now_ms();
                let evicted = policy.counter().evict_idle(now_ms, self.idle_windows);
                if evicted > 0 {
                    debug!(policy = %kind, evicted, "Evicted idle counters");
                }
                evicted
            })
            .sum()
    }

    /// Total number of tracked keys across policies.
    pub fn tracked_keys(&self) -> usize {
        self.policies
            .values()
            .map(|policy| policy.counter().store().len())
            .sum()
    }

    /// Forget every counter. Mostly useful in tests.
    pub fn clear(&self) {
        for policy in self.policies.values() {
            policy.counter().store().clear();
        }
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` flips to `true`.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.sweep();
                        debug!(evicted, tracked = registry.tracked_keys(), "Counter sweep finished");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Counter sweeper stopped");
        })
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("policies", &self.policies)
            .field("idle_windows", &self.idle_windows)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::key::{ClientKey, RequestInfo};
    use crate::ratelimit::policy::Admission;
    use crate::ratelimit::rules::PolicyOverride;

    fn registry(clock: &ManualClock) -> LimiterRegistry {
        LimiterRegistry::new(&RateLimitingConfig::default(), Arc::new(clock.clone())).unwrap()
    }

    #[test]
    fn test_all_policies_present() {
        let registry = registry(&ManualClock::new(0));
        let names: Vec<&str> = registry.iter().map(|(_, p)| p.name()).collect();
        assert_eq!(
            names,
            vec!["general", "authentication", "password_reset", "resource_creation"]
        );
        assert_eq!(registry.get(PolicyKind::PasswordReset).config().max_requests, 5);
    }

    #[test]
    fn test_policies_do_not_share_counters() {
        let clock = ManualClock::new(0);
        let registry = registry(&clock);
        let req = RequestInfo::new("POST", "/api/auth/login", ClientKey::from("1.2.3.4"));

        for _ in 0..11 {
            registry.get(PolicyKind::Authentication).evaluate(&req);
        }
        assert!(!registry.get(PolicyKind::Authentication).evaluate(&req).is_admitted());

        let general = registry.get(PolicyKind::General).evaluate(&req);
        assert_eq!(general.quota().unwrap().remaining, 99);
    }

    #[test]
    fn test_health_check_bypasses_general_only() {
        let registry = registry(&ManualClock::new(0));
        let health = RequestInfo::new("GET", "/api/health", ClientKey::from("1.2.3.4"));

        assert_eq!(
            registry.get(PolicyKind::General).evaluate(&health),
            Admission::Bypassed
        );
        assert_ne!(
            registry.get(PolicyKind::Authentication).evaluate(&health),
            Admission::Bypassed
        );
    }

    #[test]
    fn test_invalid_override_fails_startup() {
        let mut config = RateLimitingConfig::default();
        config.policies.insert(
            PolicyKind::ResourceCreation,
            PolicyOverride {
                window_ms: Some(0),
                ..Default::default()
            },
        );

        let result = LimiterRegistry::new(&config, Arc::new(ManualClock::new(0)));
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_sweep_evicts_idle_keys() {
        let clock = ManualClock::new(0);
        let registry = registry(&clock);
        let req = RequestInfo::new("GET", "/api/pools", ClientKey::from("1.2.3.4"));

        registry.get(PolicyKind::General).evaluate(&req);
        registry.get(PolicyKind::ResourceCreation).evaluate(&req);
        assert_eq!(registry.tracked_keys(), 2);

        // Two general windows later: only the general entry is idle long enough.
        clock.advance(Duration::from_secs(120));
        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.tracked_keys(), 1);

        registry.clear();
        assert_eq!(registry.tracked_keys(), 0);
    }

    #[test]
    fn test_custom_store_factory() {
        let mut kinds = Vec::new();
        let registry = LimiterRegistry::with_store_factory(
            &RateLimitingConfig::default(),
            Arc::new(ManualClock::new(0)),
            |kind| {
                kinds.push(kind);
                Arc::new(MemoryStore::new())
            },
        )
        .unwrap();

        assert_eq!(kinds, PolicyKind::ALL.to_vec());
        assert_eq!(registry.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let clock = ManualClock::new(0);
        let registry = Arc::new(registry(&clock));
        let (tx, rx) = watch::channel(false);

        let handle = registry.spawn_sweeper(Duration::from_millis(10), rx);
        tx.send(true).unwrap();

        let joined =
            tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await);
        tokio_test::assert_ok!(joined);
    }
}
