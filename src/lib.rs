//! # outbound-guard
//!
//! Circuit breaking and classified retry for the calls a service makes to its
//! sibling services.
//!
//! Every outbound call goes through a [`ResilientClient`] bound to one dependency.
//! The client gates the call through the dependency's [`CircuitBreaker`], performs
//! transport attempts, classifies failures, retries the transient ones with
//! exponential backoff and jitter, and hands the caller either the payload or a
//! typed [`ClientError`].
//!
//! ## Breaker states
//!
//! - **Closed**: Normal operation. Calls pass through to the dependency.
//! - **Open**: Calls are rejected, or served by a fallback, without reaching the
//!   dependency until the open window elapses.
//! - **Half-Open**: Calls are let through to probe recovery. Enough consecutive
//!   successes close the circuit; any failure opens it again.
//!
//! Breakers count *logical calls*: a call that needed three retries to succeed is
//! one success, a call that exhausted its retries is one failure.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use outbound_guard::{
//!     fallback_value, BreakerRegistry, ClientError, DependencyConfig, InvokeOptions, Request,
//!     ResilientClient, Transport,
//! };
//! use serde_json::json;
//!
//! async fn charge<T: Transport>(
//!     registry: &BreakerRegistry,
//!     transport: Arc<T>,
//! ) -> Result<(), ClientError> {
//!     let payments = ResilientClient::new(
//!         DependencyConfig::from_env("payment-service"),
//!         transport,
//!         registry,
//!     );
//!
//!     let receipt = payments
//!         .invoke_with(
//!             Request::post("/charges", json!({ "amount": 1200 })),
//!             InvokeOptions::default().with_fallback(fallback_value(json!({ "queued": true }))),
//!         )
//!         .await?;
//!     println!("{receipt}");
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `http` - [`HttpTransport`], a `reqwest`-backed transport
//! - `prometheus` - Prometheus metrics sink

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod classify;
mod client;
mod config;
mod error;
mod hook;
#[cfg(feature = "http")]
mod http;
mod metrics;
pub mod prelude;
mod registry;
mod retry;
mod state;
mod transport;

// Re-exports
pub use breaker::{fallback_fn, BreakerSnapshot, CircuitBreaker, Fallback};
pub use classify::{classify, classify_kind, Classification, FailureKind};
pub use client::{
    fallback_value, safe_call, safe_call_with, InvokeOptions, ResilientClient, SafeCallOutcome,
};
pub use config::{BreakerBuilder, BreakerConfig, DependencyConfig, RetryConfig};
pub use error::{BreakerError, BreakerResult, ClientError};
pub use hook::HookRegistry;
#[cfg(feature = "http")]
pub use http::HttpTransport;
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusSink;
pub use metrics::{BreakerMetrics, MetricSink, NullMetricSink};
pub use registry::{BreakerRegistry, HealthReport};
pub use retry::{AttemptRecord, RetryContext, RetryPolicy};
pub use state::State;
pub use transport::{
    AttemptContext, Method, Request, Response, Transport, TransportError, TransportErrorKind,
};
