//! Circuit breaker states.

use serde::Serialize;
use std::fmt;

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Circuit is closed and calls reach the dependency.
    Closed,

    /// Circuit is open and calls are rejected until the wait window elapses.
    Open,

    /// Circuit is letting calls through to probe whether the dependency recovered.
    HalfOpen,
}

impl State {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change applied under the breaker lock, reported once the lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub(crate) from: State,
    pub(crate) to: State,
}

impl Transition {
    pub(crate) fn new(from: State, to: State) -> Self {
        Self { from, to }
    }
}
