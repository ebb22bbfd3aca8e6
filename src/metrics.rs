//! Call accounting and metric sinks.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::state::State;

/// Trait for metrics sinks that can receive breaker and client events.
pub trait MetricSink: Send + Sync + 'static {
    /// Records a state transition event.
    fn record_state_transition(&self, dependency: &str, from: State, to: State);

    /// Records a completed logical call.
    fn record_call(&self, dependency: &str, success: bool, duration: Duration);

    /// Records a call rejected by an open circuit.
    fn record_rejected(&self, dependency: &str);

    /// Records a scheduled retry.
    fn record_retry(&self, dependency: &str, attempt: u32, delay: Duration);
}

/// A null metrics sink that discards all events.
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_state_transition(&self, _dependency: &str, _from: State, _to: State) {}
    fn record_call(&self, _dependency: &str, _success: bool, _duration: Duration) {}
    fn record_rejected(&self, _dependency: &str) {}
    fn record_retry(&self, _dependency: &str, _attempt: u32, _delay: Duration) {}
}

/// Lifetime counters of a breaker. Only ever incremented, except by an explicit reset.
#[derive(Debug, Default)]
pub(crate) struct CallCounters {
    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejected: AtomicU64,
}

impl CallCounters {
    pub(crate) fn record_call(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BreakerMetrics {
        BreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.total_successes.store(0, Ordering::Relaxed);
        self.total_failures.store(0, Ordering::Relaxed);
        self.total_rejected.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a breaker's lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerMetrics {
    /// Calls that entered the breaker gate, rejected ones included.
    pub total_calls: u64,
    /// Calls whose operation succeeded.
    pub total_successes: u64,
    /// Calls whose operation failed.
    pub total_failures: u64,
    /// Calls rejected while the circuit was open.
    pub total_rejected: u64,
}

#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusSink;

#[cfg(feature = "prometheus")]
mod prometheus {
    use prometheus_client::encoding::EncodeLabelSet;
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
    use prometheus_client::registry::Registry;
    use std::time::Duration;

    use super::MetricSink;
    use crate::state::State;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct TransitionLabels {
        dependency: String,
        from: String,
        to: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct CallLabels {
        dependency: String,
        outcome: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct DependencyLabels {
        dependency: String,
    }

    /// Metric sink exporting to a `prometheus-client` registry.
    pub struct PrometheusSink {
        transitions: Family<TransitionLabels, Counter>,
        calls: Family<CallLabels, Counter>,
        durations: Family<DependencyLabels, Histogram, fn() -> Histogram>,
        rejected: Family<DependencyLabels, Counter>,
        retries: Family<DependencyLabels, Counter>,
    }

    impl PrometheusSink {
        /// Creates the metric families and registers them in `registry`.
        pub fn new(registry: &mut Registry) -> Self {
            let sink = Self {
                transitions: Family::default(),
                calls: Family::default(),
                durations: Family::new_with_constructor(|| {
                    Histogram::new(exponential_buckets(0.005, 2.0, 14))
                }),
                rejected: Family::default(),
                retries: Family::default(),
            };

            registry.register(
                "outbound_breaker_transitions",
                "Circuit breaker state transitions",
                sink.transitions.clone(),
            );
            registry.register(
                "outbound_calls",
                "Completed outbound calls by outcome",
                sink.calls.clone(),
            );
            registry.register(
                "outbound_call_duration_seconds",
                "Wall-clock duration of outbound calls, retries included",
                sink.durations.clone(),
            );
            registry.register(
                "outbound_rejected",
                "Calls rejected by an open circuit",
                sink.rejected.clone(),
            );
            registry.register(
                "outbound_retries",
                "Retries scheduled after a retryable failure",
                sink.retries.clone(),
            );

            sink
        }

        fn dependency(dependency: &str) -> DependencyLabels {
            DependencyLabels {
                dependency: dependency.to_owned(),
            }
        }
    }

    impl MetricSink for PrometheusSink {
        fn record_state_transition(&self, dependency: &str, from: State, to: State) {
            self.transitions
                .get_or_create(&TransitionLabels {
                    dependency: dependency.to_owned(),
                    from: from.as_str().to_owned(),
                    to: to.as_str().to_owned(),
                })
                .inc();
        }

        fn record_call(&self, dependency: &str, success: bool, duration: Duration) {
            let outcome = if success { "success" } else { "failure" };
            self.calls
                .get_or_create(&CallLabels {
                    dependency: dependency.to_owned(),
                    outcome: outcome.to_owned(),
                })
                .inc();
            self.durations
                .get_or_create(&Self::dependency(dependency))
                .observe(duration.as_secs_f64());
        }

        fn record_rejected(&self, dependency: &str) {
            self.rejected
                .get_or_create(&Self::dependency(dependency))
                .inc();
        }

        fn record_retry(&self, dependency: &str, _attempt: u32, _delay: Duration) {
            self.retries.get_or_create(&Self::dependency(dependency)).inc();
        }
    }
}
