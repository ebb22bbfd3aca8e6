//! Breaker-gated, retrying client bound to one dependency.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::breaker::{fallback_fn, CircuitBreaker, Fallback};
use crate::classify::{classify, FailureKind};
use crate::config::DependencyConfig;
use crate::error::ClientError;
use crate::metrics::MetricSink;
use crate::registry::BreakerRegistry;
use crate::retry::{RetryContext, RetryPolicy};
use crate::transport::{AttemptContext, Request, Response, Transport, TransportError};

/// Per-call options of [`ResilientClient::invoke_with`].
#[derive(Default)]
pub struct InvokeOptions {
    fallback: Option<Fallback<Value>>,
    deadline: Option<Duration>,
}

impl InvokeOptions {
    /// Payload to serve instead of [`ClientError::CircuitOpen`] when the circuit is open.
    pub fn with_fallback(mut self, fallback: Fallback<Value>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Bound on the whole call, retries and backoff included.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Creates a fallback that serves a fixed payload.
pub fn fallback_value(value: Value) -> Fallback<Value> {
    fallback_fn(move || async move {
        info!(fallback = %value, "using fallback value");
        value
    })
}

/// Client for one dependency: breaker gate, transport attempts, classified retries,
/// and typed errors.
pub struct ResilientClient<T: Transport> {
    config: DependencyConfig,
    transport: Arc<T>,
    breaker: Option<CircuitBreaker>,
    retry: RetryPolicy,
    metric_sink: Arc<dyn MetricSink>,
}

impl<T: Transport> ResilientClient<T> {
    /// Binds a client to the dependency described by `config`.
    ///
    /// The dependency's breaker is taken from `registry`, so every client of the
    /// same dependency shares it.
    pub fn new(config: DependencyConfig, transport: Arc<T>, registry: &BreakerRegistry) -> Self {
        let breaker = config
            .enable_circuit_breaker
            .then(|| registry.get_or_create(&config.name, config.breaker));
        let retry = if config.enable_retry {
            RetryPolicy::new(config.retry)
        } else {
            RetryPolicy::disabled()
        };

        Self {
            metric_sink: registry.metric_sink(),
            config,
            transport,
            breaker,
            retry,
        }
    }

    /// Name of the bound dependency.
    pub fn dependency(&self) -> &str {
        &self.config.name
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &DependencyConfig {
        &self.config
    }

    /// The dependency's breaker, unless breaking is disabled.
    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Performs `request` and returns the response payload.
    pub async fn invoke(&self, request: Request) -> Result<Value, ClientError> {
        self.invoke_with(request, InvokeOptions::default()).await
    }

    /// Performs `request` with per-call options and returns the response payload.
    pub async fn invoke_with(
        &self,
        request: Request,
        options: InvokeOptions,
    ) -> Result<Value, ClientError> {
        self.send(&request, options)
            .await
            .map(|response| response.data)
    }

    /// Performs `request` and decodes the payload into `R`.
    pub async fn invoke_as<R: DeserializeOwned>(
        &self,
        request: Request,
        options: InvokeOptions,
    ) -> Result<R, ClientError> {
        let data = self.invoke_with(request, options).await?;
        serde_json::from_value(data).map_err(|source| ClientError::Decode {
            dependency: self.config.name.clone(),
            source,
        })
    }

    /// Performs `request` and returns the whole response.
    pub async fn send(
        &self,
        request: &Request,
        options: InvokeOptions,
    ) -> Result<Response, ClientError> {
        let started = Instant::now();
        let InvokeOptions { fallback, deadline } = options;
        let call = || self.run(request, started, deadline);

        match &self.breaker {
            Some(breaker) => {
                let fallback = fallback.map(|fallback| {
                    fallback_fn(move || async move { Response::ok(fallback().await) })
                });
                breaker
                    .execute(call, fallback)
                    .await
                    .map_err(ClientError::from)
            }
            None => {
                let result = call().await;
                self.metric_sink
                    .record_call(&self.config.name, result.is_ok(), started.elapsed());
                result
            }
        }
    }

    async fn run(
        &self,
        request: &Request,
        started: Instant,
        deadline: Option<Duration>,
    ) -> Result<Response, ClientError> {
        let Some(limit) = deadline else {
            return self.retry_loop(request, started).await;
        };
        let Some(at) = started.checked_add(limit) else {
            return self.retry_loop(request, started).await;
        };

        match tokio::time::timeout_at(at, self.retry_loop(request, started)).await {
            Ok(result) => result,
            Err(_) => {
                let operation = self.operation(request);
                error!(
                    dependency = %self.config.name,
                    operation = %operation,
                    target = %self.target(request),
                    deadline_ms = duration_ms(limit),
                    duration_ms = duration_ms(started.elapsed()),
                    "outbound call exceeded its deadline"
                );
                Err(ClientError::Timeout {
                    dependency: self.config.name.clone(),
                    operation,
                    timeout: limit,
                })
            }
        }
    }

    async fn retry_loop(&self, request: &Request, started: Instant) -> Result<Response, ClientError> {
        let mut retry = RetryContext::new(&self.retry);
        let timeout = request.timeout.unwrap_or(self.config.timeout);

        loop {
            let attempt = AttemptContext {
                dependency: self.config.name.clone(),
                base_url: self.config.base_url.clone(),
                number: retry.attempt_number(),
                timeout,
            };
            debug!(
                dependency = %self.config.name,
                method = %request.method,
                target = %attempt.url(request),
                attempt = attempt.number,
                "outbound call"
            );

            let failure = match self.attempt(request, &attempt).await {
                Ok(response) => {
                    info!(
                        dependency = %self.config.name,
                        method = %request.method,
                        target = %attempt.url(request),
                        status = response.status,
                        retries = retry.attempt(),
                        duration_ms = duration_ms(started.elapsed()),
                        "outbound call completed"
                    );
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            let classification = classify(&failure);
            retry.record_failure(&classification, failure.status());

            let next = retry.next_retry();
            if !self.retry.should_retry(next, &classification) {
                return Err(self.terminal_error(
                    request,
                    &attempt,
                    failure,
                    classification.kind,
                    &retry,
                    started,
                ));
            }

            let delay = self.retry.delay(next);
            warn!(
                dependency = %self.config.name,
                target = %attempt.url(request),
                attempt = next,
                max_retries = retry.max_attempts(),
                delay_ms = duration_ms(delay),
                error = %failure,
                "retrying outbound call"
            );
            self.metric_sink.record_retry(&self.config.name, next, delay);

            tokio::time::sleep(delay).await;
            retry.advance();
        }
    }

    async fn attempt(
        &self,
        request: &Request,
        attempt: &AttemptContext,
    ) -> Result<Response, TransportError> {
        match tokio::time::timeout(attempt.timeout, self.transport.send(request, attempt)).await {
            Err(_) => Err(TransportError::timed_out(attempt.timeout)),
            Ok(Ok(response)) if !response.is_success() => {
                Err(TransportError::http(response.status, Some(response.data)))
            }
            Ok(result) => result,
        }
    }

    fn terminal_error(
        &self,
        request: &Request,
        attempt: &AttemptContext,
        failure: TransportError,
        kind: FailureKind,
        retry: &RetryContext,
        started: Instant,
    ) -> ClientError {
        let operation = self.operation(request);
        let status = failure.status();

        error!(
            dependency = %self.config.name,
            operation = %operation,
            target = %attempt.url(request),
            status = ?status,
            attempts = attempt.number,
            retries = retry.attempt(),
            duration_ms = duration_ms(started.elapsed()),
            failures = ?retry.failures(),
            error = %failure,
            "outbound call failed"
        );

        if kind == FailureKind::Timeout {
            return ClientError::Timeout {
                dependency: self.config.name.clone(),
                operation,
                timeout: attempt.timeout,
            };
        }

        let message = match failure.body_message().map(str::to_owned) {
            Some(message) => message,
            None if !failure.message.is_empty() => failure.message,
            None => format!("external service error: {}", self.config.name),
        };

        ClientError::Dependency {
            dependency: self.config.name.clone(),
            operation,
            status,
            retries: retry.attempt(),
            message,
        }
    }

    fn operation(&self, request: &Request) -> String {
        format!(
            "{}.{}",
            self.config.name,
            request.method.as_str().to_ascii_lowercase()
        )
    }

    fn target(&self, request: &Request) -> String {
        crate::transport::join_url(&self.config.base_url, &request.path)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Result of [`safe_call`]: never an `Err`, the failure rides along instead.
#[derive(Debug)]
pub struct SafeCallOutcome {
    /// Whether the dependency answered successfully.
    pub success: bool,
    /// The payload, or the fallback when the call failed.
    pub data: Option<Value>,
    /// The failure, when there was one.
    pub error: Option<ClientError>,
}

/// Performs `request`, substituting `fallback` for the payload on any failure.
pub async fn safe_call<T: Transport>(
    client: &ResilientClient<T>,
    request: Request,
    fallback: Option<Value>,
) -> SafeCallOutcome {
    safe_call_with(client, request, fallback.map(fallback_value)).await
}

/// Like [`safe_call`], but the fallback payload is produced on demand, only when
/// the call failed.
pub async fn safe_call_with<T: Transport>(
    client: &ResilientClient<T>,
    request: Request,
    fallback: Option<Fallback<Value>>,
) -> SafeCallOutcome {
    match client.invoke(request).await {
        Ok(data) => SafeCallOutcome {
            success: true,
            data: Some(data),
            error: None,
        },
        Err(error) => {
            warn!(
                dependency = %client.dependency(),
                error = %error,
                fallback = fallback.is_some(),
                "outbound call failed, continuing without its result"
            );
            let data = match fallback {
                Some(fallback) => Some(fallback().await),
                None => None,
            };
            SafeCallOutcome {
                success: false,
                data,
                error: Some(error),
            }
        }
    }
}
