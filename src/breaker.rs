//! Core circuit breaker implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{BreakerBuilder, BreakerConfig};
use crate::error::{BreakerError, BreakerResult};
use crate::hook::HookRegistry;
use crate::metrics::{BreakerMetrics, CallCounters, MetricSink};
use crate::state::{State, Transition};

/// Alternative result produced when an open circuit rejects a call.
pub type Fallback<T> = Box<dyn FnOnce() -> BoxFuture<'static, T> + Send>;

/// Wraps an async closure into a [`Fallback`].
pub fn fallback_fn<T, F, Fut>(f: F) -> Fallback<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// State and counters that change together. Guarded by one lock per breaker.
#[derive(Debug)]
struct Core {
    state: State,
    failure_count: u32,
    success_count: u32,
    next_attempt: Option<Instant>,
    next_attempt_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl Core {
    fn closed() -> Self {
        Self {
            state: State::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt: None,
            next_attempt_at: None,
            last_failure_at: None,
        }
    }

    fn trip(&mut self, open_duration: Duration) {
        self.state = State::Open;
        self.next_attempt = Instant::now().checked_add(open_duration);
        self.next_attempt_at = chrono::Duration::from_std(open_duration)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));
    }
}

struct BreakerInner {
    name: String,
    config: BreakerConfig,
    core: Mutex<Core>,
    counters: CallCounters,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

/// A circuit breaker guarding the calls made to one dependency.
///
/// Cloning is cheap and every clone shares the same state, so one breaker can be
/// handed to every client and task that talks to the dependency.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker for `name` with the given thresholds.
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        metric_sink: Arc<dyn MetricSink>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let config = BreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            open_duration: config.open_duration,
        };

        let inner = BreakerInner {
            name: name.into(),
            config,
            core: Mutex::new(Core::closed()),
            counters: CallCounters::default(),
            metric_sink,
            hooks,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder {
        BreakerBuilder::new(name)
    }

    /// Name of the guarded dependency.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Thresholds this breaker was built with.
    pub fn config(&self) -> BreakerConfig {
        self.inner.config
    }

    /// Gets the current state of the circuit breaker.
    pub fn current_state(&self) -> State {
        self.inner.core.lock().state
    }

    /// Point-in-time view of state, counters and lifetime metrics.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.inner.core.lock();
        BreakerSnapshot {
            name: self.inner.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            metrics: self.inner.counters.snapshot(),
            next_attempt_at: match core.state {
                State::Open => core.next_attempt_at,
                _ => None,
            },
            last_failure_at: core.last_failure_at,
        }
    }

    /// Executes a function wrapped by the circuit breaker.
    pub fn call<F, T, E>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.pre_call() {
            return Err(self.open_error());
        }

        let start = Instant::now();
        let result = f();
        self.post_call(result.is_ok(), start.elapsed());

        result.map_err(BreakerError::Operation)
    }

    /// Executes an async function wrapped by the circuit breaker.
    pub async fn call_async<F, Fut, T, E>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(f, None).await
    }

    /// Gates `f` through the breaker.
    ///
    /// Counts the call, and if the circuit admits it, runs `f` and records its outcome
    /// as exactly one success or failure. A rejected call never runs `f`: it resolves
    /// to `fallback` when one is supplied, and to [`BreakerError::Open`] otherwise.
    pub async fn execute<F, Fut, T, E>(
        &self,
        f: F,
        fallback: Option<Fallback<T>>,
    ) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.pre_call() {
            return match fallback {
                Some(fallback) => {
                    debug!(dependency = %self.inner.name, "circuit open, serving fallback");
                    Ok(fallback().await)
                }
                None => Err(self.open_error()),
            };
        }

        let start = Instant::now();
        let result = f().await;
        self.post_call(result.is_ok(), start.elapsed());

        result.map_err(BreakerError::Operation)
    }

    /// Records a successful call.
    pub fn on_success(&self) {
        self.inner.counters.record_success();

        let transition = {
            let mut core = self.inner.core.lock();
            match core.state {
                State::Closed => {
                    core.failure_count = 0;
                    None
                }
                State::HalfOpen => {
                    if core.success_count + 1 >= self.inner.config.success_threshold {
                        core.state = State::Closed;
                        core.success_count = 0;
                        core.failure_count = 0;
                        Some(Transition::new(State::HalfOpen, State::Closed))
                    } else {
                        core.success_count += 1;
                        None
                    }
                }
                // A call admitted before the circuit opened; the window stands.
                State::Open => None,
            }
        };

        if let Some(transition) = transition {
            self.report(transition);
        }
    }

    /// Records a failed call.
    pub fn on_failure(&self) {
        self.inner.counters.record_failure();

        let transition = {
            let mut core = self.inner.core.lock();
            core.last_failure_at = Some(Utc::now());
            match core.state {
                State::Closed => {
                    core.failure_count = core.failure_count.saturating_add(1);
                    if core.failure_count >= self.inner.config.failure_threshold {
                        core.trip(self.inner.config.open_duration);
                        Some(Transition::new(State::Closed, State::Open))
                    } else {
                        None
                    }
                }
                State::HalfOpen => {
                    core.success_count = 0;
                    core.trip(self.inner.config.open_duration);
                    Some(Transition::new(State::HalfOpen, State::Open))
                }
                State::Open => None,
            }
        };

        if let Some(transition) = transition {
            self.report(transition);
        }
    }

    /// Forces the circuit breaker to the open state for one open window.
    pub fn force_open(&self) -> bool {
        let transition = {
            let mut core = self.inner.core.lock();
            if core.state == State::Open {
                return false;
            }
            let from = core.state;
            core.trip(self.inner.config.open_duration);
            Transition::new(from, State::Open)
        };

        self.report(transition);
        true
    }

    /// Forces the circuit breaker to the closed state, clearing its counters.
    pub fn force_closed(&self) -> bool {
        let transition = {
            let mut core = self.inner.core.lock();
            if core.state == State::Closed {
                return false;
            }
            let from = core.state;
            let last_failure_at = core.last_failure_at;
            *core = Core::closed();
            core.last_failure_at = last_failure_at;
            Transition::new(from, State::Closed)
        };

        self.report(transition);
        true
    }

    /// Returns the breaker to a fresh closed state and zeroes its lifetime metrics.
    pub fn reset(&self) {
        *self.inner.core.lock() = Core::closed();
        self.inner.counters.reset();
    }

    /// Checks if a call is allowed, moving an expired open circuit to half-open.
    fn pre_call(&self) -> bool {
        self.inner.counters.record_call();

        let now = Instant::now();
        let (admitted, transition) = {
            let mut core = self.inner.core.lock();
            match core.state {
                State::Closed | State::HalfOpen => (true, None),
                State::Open => match core.next_attempt {
                    Some(at) if now >= at => {
                        core.state = State::HalfOpen;
                        core.success_count = 0;
                        core.next_attempt = None;
                        core.next_attempt_at = None;
                        (true, Some(Transition::new(State::Open, State::HalfOpen)))
                    }
                    _ => (false, None),
                },
            }
        };

        // Execute hooks outside the lock path
        if let Some(transition) = transition {
            self.report(transition);
        }

        if !admitted {
            self.inner.counters.record_rejected();
            self.inner.metric_sink.record_rejected(&self.inner.name);
            self.inner.hooks.execute_rejected_hook(&self.inner.name);
            warn!(dependency = %self.inner.name, "circuit open, call rejected");
        }

        admitted
    }

    fn post_call(&self, success: bool, duration: Duration) {
        self.inner
            .metric_sink
            .record_call(&self.inner.name, success, duration);

        if success {
            self.on_success();
        } else {
            self.on_failure();
        }
    }

    fn open_error<E>(&self) -> BreakerError<E> {
        BreakerError::Open {
            dependency: self.inner.name.clone(),
        }
    }

    fn report(&self, transition: Transition) {
        let name = &self.inner.name;
        match transition.to {
            State::Open => warn!(
                dependency = %name,
                from = %transition.from,
                open_ms = self.inner.config.open_duration.as_millis() as u64,
                "circuit breaker opened"
            ),
            State::HalfOpen => info!(dependency = %name, "circuit breaker half-open, probing"),
            State::Closed => info!(dependency = %name, from = %transition.from, "circuit breaker closed"),
        }

        self.inner
            .metric_sink
            .record_state_transition(name, transition.from, transition.to);
        self.inner
            .hooks
            .execute_state_transition_hook(name, transition.to);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("state", &self.current_state())
            .finish()
    }
}

/// Observability snapshot of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    /// Dependency name.
    pub name: String,
    /// Current state.
    pub state: State,
    /// Consecutive failures counted in the closed state.
    pub failure_count: u32,
    /// Consecutive successes counted in the half-open state.
    pub success_count: u32,
    /// Lifetime call counters.
    pub metrics: BreakerMetrics,
    /// When the next probe will be admitted; present only while open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// When the most recent failure was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
}
