//! Payment Fallback Example
//!
//! This example demonstrates:
//! 1. Wiring a resilient client to a flaky payment dependency
//! 2. Retrying transient failures with backoff
//! 3. Serving a fallback once the circuit opens
//! 4. Reporting dependency health
//!
//! Run with `RUST_LOG=outbound_guard=debug` to watch the breaker work.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use outbound_guard::{
    fallback_value, safe_call, AttemptContext, BreakerConfig, BreakerRegistry, DependencyConfig,
    HookRegistry, InvokeOptions, NullMetricSink, Request, ResilientClient, Response, RetryConfig,
    Transport, TransportError, TransportErrorKind,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// Answers the first few charges, then goes down for good.
struct FlakyPayments {
    calls: AtomicU32,
}

impl Transport for FlakyPayments {
    fn send<'a>(
        &'a self,
        request: &'a Request,
        attempt: &'a AttemptContext,
    ) -> BoxFuture<'a, Result<Response, TransportError>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            println!(
                "  -> {} {} (attempt {})",
                request.method,
                attempt.url(request),
                attempt.number
            );
            if n <= 2 {
                Ok(Response::ok(json!({ "chargeId": format!("ch_{n}"), "status": "captured" })))
            } else {
                Err(TransportError::new(
                    TransportErrorKind::ConnectionRefused,
                    "connect ECONNREFUSED payments:8080",
                ))
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Payment Fallback Example ===\n");

    let hooks = HookRegistry::new();
    hooks.set_on_open(|dependency| println!("  [{dependency}] circuit OPENED"));
    hooks.set_on_half_open(|dependency| println!("  [{dependency}] circuit HALF-OPEN"));
    hooks.set_on_close(|dependency| println!("  [{dependency}] circuit CLOSED"));

    let registry = BreakerRegistry::with_observers(Arc::new(NullMetricSink), Arc::new(hooks));

    let config = DependencyConfig::new("payment-service")
        .with_base_url("http://payments:8080")
        .with_timeout(Duration::from_secs(2))
        .with_breaker(
            BreakerConfig::default()
                .with_failure_threshold(2)
                .with_open_duration(Duration::from_secs(5)),
        )
        .with_retry(
            RetryConfig::default()
                .with_max_retries(1)
                .with_base_delay(Duration::from_millis(100)),
        );
    let transport = Arc::new(FlakyPayments {
        calls: AtomicU32::new(0),
    });
    let payments = ResilientClient::new(config, transport, &registry);

    for i in 1..=5 {
        println!("Charge {i}:");
        let result = payments
            .invoke_with(
                Request::post("/charges", json!({ "subscriptionId": "sub_42", "amount": 1200 })),
                InvokeOptions::default()
                    .with_fallback(fallback_value(json!({ "status": "queued" }))),
            )
            .await;

        match result {
            Ok(body) => println!("  <- {body}"),
            Err(err) => println!("  <- error ({}): {err}", err.http_status()),
        }
    }

    println!("\nBest-effort receipt lookup:");
    let outcome = safe_call(
        &payments,
        Request::get("/charges/ch_1"),
        Some(json!({ "status": "unknown" })),
    )
    .await;
    println!("  success={} data={:?}", outcome.success, outcome.data);

    println!("\nHealth:");
    println!("{}", serde_json::to_string_pretty(&registry.health())?);

    Ok(())
}
