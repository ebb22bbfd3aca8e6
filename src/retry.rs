//! Retry decisions and exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use smallvec::SmallVec;

use crate::classify::{Classification, FailureKind};
use crate::config::RetryConfig;

/// Decides whether a failed call is retried and how long to wait before it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    config: RetryConfig,
    enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Creates an enabled policy.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            enabled: true,
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            config: RetryConfig::default(),
            enabled: false,
        }
    }

    /// Parameters of this policy.
    pub fn config(&self) -> RetryConfig {
        self.config
    }

    /// Retries allowed after the initial attempt.
    pub fn max_retries(&self) -> u32 {
        if self.enabled {
            self.config.max_retries
        } else {
            0
        }
    }

    /// Whether retry number `attempt` (1-based) may be performed after a failure
    /// classified as `classification`.
    pub fn should_retry(&self, attempt: u32, classification: &Classification) -> bool {
        attempt >= 1 && attempt <= self.max_retries() && classification.retryable
    }

    /// Delay to await before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// [`delay`](Self::delay) drawing jitter from `rng`.
    ///
    /// `base_delay * 2^(attempt - 1)` plus jitter uniform in `[0, max_jitter)`.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self.config.base_delay.saturating_mul(1u32 << exponent);

        let jitter_us = u64::try_from(self.config.max_jitter.as_micros()).unwrap_or(u64::MAX);
        let jitter = if jitter_us == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(rng.gen_range(0..jitter_us))
        };

        backoff.saturating_add(jitter)
    }
}

/// One failed transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub number: u32,
    /// How the failure was classified.
    pub kind: FailureKind,
    /// HTTP status, if a response was received.
    pub status: Option<u16>,
}

/// Retry bookkeeping of one logical call. Owned by that call and dropped with it.
#[derive(Debug, Clone)]
pub struct RetryContext {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
    failures: SmallVec<[AttemptRecord; 4]>,
}

impl RetryContext {
    /// Creates the context for a call governed by `policy`.
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_retries(),
            base_delay: policy.config().base_delay,
            failures: SmallVec::new(),
        }
    }

    /// Retries consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Retry ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay of the governing policy.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// 1-based number of the transport attempt about to be made.
    pub fn attempt_number(&self) -> u32 {
        self.attempt + 1
    }

    /// 1-based number of the retry that would follow a failure now.
    pub fn next_retry(&self) -> u32 {
        self.attempt + 1
    }

    /// Notes a failed attempt.
    pub fn record_failure(&mut self, classification: &Classification, status: Option<u16>) {
        self.failures.push(AttemptRecord {
            number: self.attempt_number(),
            kind: classification.kind,
            status,
        });
    }

    /// Consumes one retry.
    pub fn advance(&mut self) {
        self.attempt += 1;
    }

    /// Failed attempts, oldest first.
    pub fn failures(&self) -> &[AttemptRecord] {
        &self.failures
    }
}
