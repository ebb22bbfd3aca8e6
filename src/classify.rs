//! Maps transport failures to a retry verdict and a domain error kind.

use crate::transport::{TransportError, TransportErrorKind};

/// Domain category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Nothing usable came back: no response, refused, reset or unresolvable host.
    Connection,
    /// The attempt was aborted or timed out.
    Timeout,
    /// The dependency answered 429.
    RateLimited,
    /// The dependency answered 5xx.
    Server,
    /// Any other error status.
    Client,
}

/// Verdict on one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Domain category.
    pub kind: FailureKind,
    /// Whether a retry may succeed where this attempt failed.
    pub retryable: bool,
}

impl Classification {
    fn retryable(kind: FailureKind) -> Self {
        Self {
            kind,
            retryable: true,
        }
    }

    fn permanent(kind: FailureKind) -> Self {
        Self {
            kind,
            retryable: false,
        }
    }
}

/// Classifies a transport failure.
pub fn classify(error: &TransportError) -> Classification {
    classify_kind(error.kind)
}

/// Classifies a raw transport failure category.
pub fn classify_kind(kind: TransportErrorKind) -> Classification {
    match kind {
        TransportErrorKind::NoResponse
        | TransportErrorKind::NameNotFound
        | TransportErrorKind::ConnectionRefused
        | TransportErrorKind::ConnectionReset => Classification::retryable(FailureKind::Connection),
        TransportErrorKind::ConnectionAborted | TransportErrorKind::TimedOut => {
            Classification::retryable(FailureKind::Timeout)
        }
        TransportErrorKind::Http { status: 429 } => {
            Classification::retryable(FailureKind::RateLimited)
        }
        TransportErrorKind::Http { status } if status >= 500 => {
            Classification::retryable(FailureKind::Server)
        }
        TransportErrorKind::Http { .. } => Classification::permanent(FailureKind::Client),
    }
}
