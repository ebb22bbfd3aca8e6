use outbound_guard::{BreakerError, CircuitBreaker, HookRegistry, State};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tokio::time::advance;
use tokio_test::{assert_err, assert_ok};

// Custom error type that implements Error trait
#[derive(Debug)]
struct TestError(String);

impl TestError {
    fn new(msg: &str) -> Self {
        TestError(msg.to_string())
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test error: {}", self.0)
    }
}

impl Error for TestError {}

fn ok() -> Result<&'static str, TestError> {
    Ok("success")
}

fn fail() -> Result<&'static str, TestError> {
    Err(TestError::new("failure"))
}

fn breaker(failures: u32, successes: u32, open: Duration) -> CircuitBreaker {
    CircuitBreaker::builder("payment-service")
        .failure_threshold(failures)
        .success_threshold(successes)
        .open_duration(open)
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_trips_open_after_consecutive_failures() {
    let breaker = breaker(3, 2, Duration::from_secs(60));

    for _ in 0..2 {
        assert_err!(breaker.call(fail));
        assert_eq!(breaker.current_state(), State::Closed);
    }
    assert_eq!(breaker.snapshot().failure_count, 2);
    assert!(breaker.snapshot().next_attempt_at.is_none());

    assert_err!(breaker.call(fail));

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, State::Open);
    assert_eq!(snapshot.failure_count, 3);
    assert!(snapshot.next_attempt_at.is_some());
    assert!(snapshot.last_failure_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_count_while_closed() {
    let breaker = breaker(3, 2, Duration::from_secs(60));

    assert_err!(breaker.call(fail));
    assert_err!(breaker.call(fail));
    assert_ok!(breaker.call(ok));
    assert_eq!(breaker.snapshot().failure_count, 0);

    assert_err!(breaker.call(fail));
    assert_err!(breaker.call(fail));
    assert_eq!(breaker.current_state(), State::Closed);

    assert_err!(breaker.call(fail));
    assert_eq!(breaker.current_state(), State::Open);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_rejects_without_running_operation() {
    let breaker = breaker(1, 2, Duration::from_secs(60));
    assert_err!(breaker.call(fail));

    let invoked = AtomicUsize::new(0);
    for expected_rejected in 1..=3 {
        let result = breaker.call(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            ok()
        });
        match result {
            Err(BreakerError::Open { dependency }) => assert_eq!(dependency, "payment-service"),
            other => panic!("expected open circuit, got {:?}", other),
        }
        assert_eq!(breaker.snapshot().metrics.total_rejected, expected_rejected);
    }

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    let metrics = breaker.snapshot().metrics;
    assert_eq!(metrics.total_calls, 4);
    assert_eq!(metrics.total_failures, 1);
    assert_eq!(metrics.total_successes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_probe_admitted_exactly_when_window_elapses() {
    let breaker = breaker(2, 2, Duration::from_secs(60));
    assert_err!(breaker.call(fail));
    assert_err!(breaker.call(fail));
    assert_eq!(breaker.current_state(), State::Open);

    advance(Duration::from_millis(59_999)).await;
    let result = breaker.call(ok);
    assert!(matches!(result, Err(BreakerError::Open { .. })));
    assert_eq!(breaker.current_state(), State::Open);

    advance(Duration::from_millis(1)).await;
    let state_inside = std::cell::Cell::new(None);
    assert_ok!(breaker.call(|| {
        state_inside.set(Some(breaker.current_state()));
        ok()
    }));
    // The transition happens before the operation runs.
    assert_eq!(state_inside.get(), Some(State::HalfOpen));

    // One success is not enough with a threshold of two.
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, State::HalfOpen);
    assert_eq!(snapshot.success_count, 1);
    assert!(snapshot.next_attempt_at.is_none());

    assert_ok!(breaker.call(ok));
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, State::Closed);
    assert_eq!(snapshot.success_count, 0);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens_with_fresh_window() {
    let breaker = breaker(1, 3, Duration::from_secs(10));
    assert_err!(breaker.call(fail));

    advance(Duration::from_secs(10)).await;
    assert_ok!(breaker.call(ok));
    assert_ok!(breaker.call(ok));
    assert_eq!(breaker.snapshot().success_count, 2);

    assert_err!(breaker.call(fail));
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, State::Open);
    assert_eq!(snapshot.success_count, 0);

    // The window restarts at the failing probe.
    advance(Duration::from_secs(9)).await;
    assert!(matches!(breaker.call(ok), Err(BreakerError::Open { .. })));
    advance(Duration::from_secs(1)).await;
    assert_ok!(breaker.call(ok));
    assert_eq!(breaker.current_state(), State::HalfOpen);
    assert_eq!(breaker.snapshot().success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_served_while_open() {
    let breaker = breaker(1, 1, Duration::from_secs(60));
    assert_err!(breaker.call(fail));

    let result: Result<&str, BreakerError<TestError>> = breaker
        .execute(
            || async { Ok("from dependency") },
            Some(outbound_guard::fallback_fn(|| async { "cached" })),
        )
        .await;
    assert_eq!(assert_ok!(result), "cached");
    assert_eq!(breaker.snapshot().metrics.total_rejected, 1);

    // Without a fallback the rejection surfaces as an error.
    let result = breaker
        .call_async(|| async { Result::<&str, TestError>::Ok("from dependency") })
        .await;
    assert!(assert_err!(result).is_open());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_probe_transition() {
    let half_opened = Arc::new(AtomicUsize::new(0));
    let hooks = HookRegistry::new();
    let counter = Arc::clone(&half_opened);
    hooks.set_on_half_open(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let breaker = CircuitBreaker::builder("notification-service")
        .failure_threshold(1)
        .success_threshold(2)
        .open_duration(Duration::from_secs(5))
        .hooks(hooks)
        .build();
    assert_err!(breaker.call(fail));
    advance(Duration::from_secs(5)).await;

    let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);
    let probe = |breaker: CircuitBreaker, mut gate: tokio::sync::watch::Receiver<bool>| async move {
        breaker
            .call_async(|| async move {
                let _ = gate.wait_for(|open| *open).await;
                Result::<&str, TestError>::Ok("recovered")
            })
            .await
    };

    let first = tokio::spawn(probe(breaker.clone(), gate_rx.clone()));
    let second = tokio::spawn(probe(breaker.clone(), gate_rx));
    tokio::task::yield_now().await;
    assert_eq!(breaker.current_state(), State::HalfOpen);

    gate_tx.send(true).unwrap();
    assert_ok!(first.await.unwrap());
    assert_ok!(second.await.unwrap());

    assert_eq!(half_opened.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.current_state(), State::Closed);
}

#[test]
fn test_threads_trip_breaker_once() {
    let opened = Arc::new(AtomicUsize::new(0));
    let hooks = HookRegistry::new();
    let counter = Arc::clone(&opened);
    hooks.set_on_open(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let breaker = CircuitBreaker::builder("core-api")
        .failure_threshold(10)
        .open_duration(Duration::from_secs(600))
        .hooks(hooks)
        .build();

    const THREAD_COUNT: usize = 8;
    let barrier = Arc::new(Barrier::new(THREAD_COUNT));
    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|_| {
            let breaker = breaker.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..25 {
                    let _ = breaker.call(fail);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let metrics = breaker.snapshot().metrics;
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.current_state(), State::Open);
    assert_eq!(metrics.total_calls, (THREAD_COUNT * 25) as u64);
    assert_eq!(
        metrics.total_failures + metrics.total_rejected,
        metrics.total_calls
    );
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_is_stable_without_calls() {
    let breaker = breaker(1, 2, Duration::from_secs(60));
    assert_err!(breaker.call(fail));

    let first = breaker.snapshot();
    advance(Duration::from_secs(5)).await;
    let second = breaker.snapshot();
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_serializes_for_health_endpoint() {
    let breaker = breaker(1, 2, Duration::from_secs(60));
    let closed = serde_json::to_value(breaker.snapshot()).unwrap();
    assert_eq!(closed["name"], "payment-service");
    assert_eq!(closed["state"], "CLOSED");
    assert_eq!(closed["failureCount"], 0);
    assert_eq!(closed["metrics"]["totalCalls"], 0);
    assert!(closed.get("nextAttemptAt").is_none());

    assert_err!(breaker.call(fail));
    let open = serde_json::to_value(breaker.snapshot()).unwrap();
    assert_eq!(open["state"], "OPEN");
    assert!(open["nextAttemptAt"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_manual_control() {
    let breaker = CircuitBreaker::builder("core-api").build();

    // Force open
    assert!(breaker.force_open());
    assert_eq!(breaker.current_state(), State::Open);

    // Check that calls are rejected when open
    let result = breaker.call(ok);
    assert!(matches!(result.unwrap_err(), BreakerError::Open { .. }));

    // Trying to open again should return false (no change)
    assert!(!breaker.force_open());

    // Force closed
    assert!(breaker.force_closed());
    assert_eq!(breaker.current_state(), State::Closed);

    // Trying to close again should return false (no change)
    assert!(!breaker.force_closed());

    breaker.reset();
    assert_eq!(breaker.snapshot().metrics, Default::default());
}

#[test]
fn test_circuit_breaker_builder() {
    let breaker = CircuitBreaker::builder("core-api")
        .failure_threshold(0)
        .success_threshold(0)
        .open_duration(Duration::from_secs(5))
        .build();

    let config = breaker.config();
    assert_eq!(config.failure_threshold, 1);
    assert_eq!(config.success_threshold, 1);
    assert_eq!(config.open_duration, Duration::from_secs(5));

    let defaults = CircuitBreaker::builder("core-api").build().config();
    assert_eq!(defaults.failure_threshold, 5);
    assert_eq!(defaults.success_threshold, 2);
    assert_eq!(defaults.open_duration, Duration::from_secs(60));
}

#[test]
fn test_operation_error_passes_through() {
    let breaker = CircuitBreaker::builder("core-api").build();

    let result = breaker.call(fail);
    let err = result.unwrap_err();
    assert!(matches!(err, BreakerError::Operation(_)));
    assert_eq!(err.to_string(), "Test error: failure");
    assert!(err.source().is_none());
}
