//! Error types for breaker gating and outbound calls.

use std::time::Duration;

use thiserror::Error;

/// Result type for circuit breaker operations.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error type for circuit breaker operations.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open, calls are not permitted.
    #[error("circuit breaker for `{dependency}` is open")]
    Open {
        /// Name of the dependency whose breaker rejected the call.
        dependency: String,
    },

    /// The underlying operation failed.
    #[error(transparent)]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Returns true if the call was rejected by an open circuit.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// Returns the operation error, if the operation ran and failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

/// Typed failure of an outbound call, as seen by business-service callers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The dependency did not answer in time, or the overall deadline elapsed.
    #[error("operation `{operation}` exceeded the time limit of {}ms", timeout.as_millis())]
    Timeout {
        /// Dependency that was called.
        dependency: String,
        /// `<dependency>.<method>` of the attempted call.
        operation: String,
        /// The limit that was exceeded.
        timeout: Duration,
    },

    /// The dependency failed with an error response or could not be reached.
    #[error("{message}")]
    Dependency {
        /// Dependency that was called.
        dependency: String,
        /// `<dependency>.<method>` of the attempted call.
        operation: String,
        /// HTTP status of the last response, when one was received.
        status: Option<u16>,
        /// Number of retries performed before giving up.
        retries: u32,
        /// Human-readable cause.
        message: String,
    },

    /// The dependency's breaker is open and no fallback was supplied.
    #[error("service `{dependency}` is temporarily unavailable, try again later")]
    CircuitOpen {
        /// Dependency whose breaker rejected the call.
        dependency: String,
    },

    /// The response payload did not match the expected shape.
    #[error("could not decode response from `{dependency}`: {source}")]
    Decode {
        /// Dependency that produced the payload.
        dependency: String,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// Status code this error maps to when surfaced by the calling service.
    pub fn http_status(&self) -> u16 {
        match self {
            ClientError::Timeout { .. } => 408,
            ClientError::Dependency { .. } | ClientError::CircuitOpen { .. } => 503,
            ClientError::Decode { .. } => 502,
        }
    }

    /// Name of the dependency the failed call was aimed at.
    pub fn dependency(&self) -> &str {
        match self {
            ClientError::Timeout { dependency, .. }
            | ClientError::Dependency { dependency, .. }
            | ClientError::CircuitOpen { dependency }
            | ClientError::Decode { dependency, .. } => dependency,
        }
    }

    /// Returns true if the call never reached the dependency because the circuit was open.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ClientError::CircuitOpen { .. })
    }

    /// Retries performed before the error was produced, when known.
    pub fn retries(&self) -> Option<u32> {
        match self {
            ClientError::Dependency { retries, .. } => Some(*retries),
            _ => None,
        }
    }
}

impl From<BreakerError<ClientError>> for ClientError {
    fn from(err: BreakerError<ClientError>) -> Self {
        match err {
            BreakerError::Open { dependency } => ClientError::CircuitOpen { dependency },
            BreakerError::Operation(e) => e,
        }
    }
}
