//! Per-dependency breaker registry and the health summary built from it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::RwLock;
use serde::Serialize;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::BreakerConfig;
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::state::State;

/// Owns one circuit breaker per dependency name.
///
/// Built once at startup and passed to every component that makes outbound calls.
/// Entries are created on first use and live as long as the registry.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, CircuitBreaker, RandomState>>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    /// Creates an empty registry without metrics or hooks.
    pub fn new() -> Self {
        Self::with_observers(Arc::new(NullMetricSink), Arc::new(HookRegistry::new()))
    }

    /// Creates an empty registry whose breakers report to `metric_sink` and `hooks`.
    pub fn with_observers(metric_sink: Arc<dyn MetricSink>, hooks: Arc<HookRegistry>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::with_hasher(RandomState::new())),
            metric_sink,
            hooks,
        }
    }

    /// Returns the breaker for `name`, creating it with `config` on first use.
    ///
    /// Once a breaker exists, later calls return it unchanged whatever `config` they pass.
    pub fn get_or_create(&self, name: &str, config: BreakerConfig) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }

        self.breakers
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| {
                CircuitBreaker::builder(name)
                    .config(config)
                    .shared_metric_sink(Arc::clone(&self.metric_sink))
                    .shared_hooks(Arc::clone(&self.hooks))
                    .build()
            })
            .clone()
    }

    /// Sink shared by every breaker of this registry.
    pub fn metric_sink(&self) -> Arc<dyn MetricSink> {
        Arc::clone(&self.metric_sink)
    }

    /// Returns the breaker for `name`, if one was created.
    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.read().get(name).cloned()
    }

    /// Snapshot of the breaker for `name`.
    pub fn state(&self, name: &str) -> Option<BreakerSnapshot> {
        self.breakers.read().get(name).map(CircuitBreaker::snapshot)
    }

    /// Snapshots of every breaker, keyed by dependency name.
    pub fn states(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }

    /// Aggregate health: healthy iff every breaker is closed.
    pub fn health(&self) -> HealthReport {
        let dependencies = self.states();
        let healthy = dependencies
            .values()
            .all(|snapshot| snapshot.state == State::Closed);
        HealthReport {
            healthy,
            dependencies,
        }
    }

    /// Returns every breaker to a fresh closed state with zeroed counters.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    /// Number of registered dependencies.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Returns true if no breaker was created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

/// Health of every outbound dependency, as exposed by the service's health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// True iff every breaker is closed.
    pub healthy: bool,
    /// Per-dependency snapshots.
    pub dependencies: BTreeMap<String, BreakerSnapshot>,
}
