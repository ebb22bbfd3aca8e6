//! Configuration for breakers, retries and dependencies.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::breaker::CircuitBreaker;
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};

/// Shared variable: consecutive failures that open a breaker.
pub const ENV_FAILURE_THRESHOLD: &str = "CIRCUIT_BREAKER_FAILURE_THRESHOLD";
/// Shared variable: consecutive half-open successes that close a breaker.
pub const ENV_SUCCESS_THRESHOLD: &str = "CIRCUIT_BREAKER_SUCCESS_THRESHOLD";
/// Shared variable: milliseconds a breaker stays open.
pub const ENV_OPEN_DURATION: &str = "CIRCUIT_BREAKER_TIMEOUT";
/// Shared variable: retries after the initial attempt.
pub const ENV_RETRY_COUNT: &str = "HTTP_RETRY_COUNT";
/// Shared variable: base backoff delay in milliseconds.
pub const ENV_RETRY_DELAY: &str = "HTTP_RETRY_DELAY";
/// Legacy name of [`ENV_RETRY_COUNT`], read when the current name is unset.
pub const LEGACY_ENV_RETRY_COUNT: &str = "AXIOS_RETRY_COUNT";
/// Legacy name of [`ENV_RETRY_DELAY`], read when the current name is unset.
pub const LEGACY_ENV_RETRY_DELAY: &str = "AXIOS_RETRY_DELAY";

/// Thresholds and timing of a single circuit breaker. Immutable once the breaker exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures in the closed state that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes in the half-open state that close the circuit.
    pub success_threshold: u32,
    /// How long the circuit stays open before a probe is let through.
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    /// Returns the config with a custom failure threshold (at least 1).
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Returns the config with a custom success threshold (at least 1).
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Returns the config with a custom open duration.
    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }
}

/// Retry ceiling and backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::from_millis(200),
        }
    }
}

impl RetryConfig {
    /// Returns the config with a custom retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns the config with a custom base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Returns the config with a custom jitter bound.
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }
}

/// Everything a resilient client needs to know about one dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyConfig {
    /// Dependency name, the key into the breaker registry.
    pub name: String,
    /// Base URL that request paths are resolved against.
    pub base_url: String,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Breaker thresholds.
    pub breaker: BreakerConfig,
    /// Retry policy parameters.
    pub retry: RetryConfig,
    /// Route calls through the dependency's circuit breaker.
    pub enable_circuit_breaker: bool,
    /// Retry retryable failures.
    pub enable_retry: bool,
}

impl DependencyConfig {
    /// Creates a config with default thresholds and a 10 second request timeout.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: String::new(),
            timeout: Duration::from_secs(10),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            enable_circuit_breaker: true,
            enable_retry: true,
        }
    }

    /// Loads the config for `name` from the process environment.
    pub fn from_env(name: impl Into<String>) -> Self {
        Self::from_lookup(name, |key| std::env::var(key).ok())
    }

    /// Loads the config for `name`, reading variables through `lookup`.
    ///
    /// Shared variables tune every dependency; per-dependency variables are prefixed
    /// with the upper-cased name (`payment-service` reads `PAYMENT_SERVICE_URL`,
    /// `PAYMENT_SERVICE_TIMEOUT_MS`, `PAYMENT_SERVICE_CIRCUIT_BREAKER` and
    /// `PAYMENT_SERVICE_RETRY`). Missing or malformed values keep their defaults, as do
    /// zero durations. The retry variables fall back to their `AXIOS_` names.
    pub fn from_lookup<F>(name: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(name);
        let prefix = env_prefix(&config.name);

        config.breaker = BreakerConfig::default()
            .with_failure_threshold(parse_or(
                &lookup,
                ENV_FAILURE_THRESHOLD,
                config.breaker.failure_threshold,
            ))
            .with_success_threshold(parse_or(
                &lookup,
                ENV_SUCCESS_THRESHOLD,
                config.breaker.success_threshold,
            ))
            .with_open_duration(parse_duration_ms_or(
                &lookup,
                ENV_OPEN_DURATION,
                config.breaker.open_duration,
            ));

        let legacy = |key: &str| {
            lookup(key).or_else(|| match key {
                ENV_RETRY_COUNT => lookup(LEGACY_ENV_RETRY_COUNT),
                ENV_RETRY_DELAY => lookup(LEGACY_ENV_RETRY_DELAY),
                _ => None,
            })
        };
        config.retry = RetryConfig::default()
            .with_max_retries(parse_or(&legacy, ENV_RETRY_COUNT, config.retry.max_retries))
            .with_base_delay(parse_duration_ms_or(
                &legacy,
                ENV_RETRY_DELAY,
                config.retry.base_delay,
            ));

        if let Some(url) = lookup(&format!("{prefix}_URL")) {
            config.base_url = url.trim().to_owned();
        }
        config.timeout =
            parse_duration_ms_or(&lookup, &format!("{prefix}_TIMEOUT_MS"), config.timeout);
        config.enable_circuit_breaker = parse_flag_or(
            &lookup,
            &format!("{prefix}_CIRCUIT_BREAKER"),
            config.enable_circuit_breaker,
        );
        config.enable_retry =
            parse_flag_or(&lookup, &format!("{prefix}_RETRY"), config.enable_retry);

        config
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the breaker thresholds.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Sets the retry parameters.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables the circuit breaker.
    pub fn circuit_breaker(mut self, enabled: bool) -> Self {
        self.enable_circuit_breaker = enabled;
        self
    }

    /// Enables or disables retries.
    pub fn retry(mut self, enabled: bool) -> Self {
        self.enable_retry = enabled;
        self
    }
}

fn env_prefix(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring malformed configuration value");
            default
        }),
    }
}

/// Milliseconds as a duration. Zero counts as unset and keeps `default`.
fn parse_duration_ms_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, duration_ms(default)) {
        0 => {
            warn!(key, "ignoring zero duration, keeping default");
            default
        }
        ms => Duration::from_millis(ms),
    }
}

fn parse_flag_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!(key, value = %raw, "ignoring malformed configuration flag");
                default
            }
        },
    }
}

/// Builder for creating circuit breakers with custom configurations.
pub struct BreakerBuilder {
    name: String,
    config: BreakerConfig,
    metric_sink: Arc<dyn MetricSink>,
    hook_registry: Arc<HookRegistry>,
}

impl BreakerBuilder {
    /// Creates a new builder for the breaker guarding `name`, with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig::default(),
            metric_sink: Arc::new(NullMetricSink),
            hook_registry: Arc::new(HookRegistry::new()),
        }
    }

    /// Sets the number of consecutive failures required to trip the circuit.
    pub fn failure_threshold(mut self, count: u32) -> Self {
        self.config = self.config.with_failure_threshold(count);
        self
    }

    /// Sets the number of consecutive half-open successes required to close the circuit.
    pub fn success_threshold(mut self, count: u32) -> Self {
        self.config = self.config.with_success_threshold(count);
        self
    }

    /// Sets how long the circuit stays open before probing.
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config = self.config.with_open_duration(duration);
        self
    }

    /// Replaces all thresholds at once.
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets a metric sink for the circuit breaker.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        self.metric_sink = Arc::new(sink);
        self
    }

    /// Shares an existing metric sink with the circuit breaker.
    pub fn shared_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = sink;
        self
    }

    /// Sets a hook registry for the circuit breaker.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hook_registry = Arc::new(hooks);
        self
    }

    /// Shares an existing hook registry with the circuit breaker.
    pub fn shared_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hook_registry = hooks;
        self
    }

    /// Builds the circuit breaker.
    pub fn build(self) -> CircuitBreaker {
        CircuitBreaker::new(self.name, self.config, self.metric_sink, self.hook_registry)
    }
}
