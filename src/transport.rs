//! The failure surface of the network layer that resilient clients wrap.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

/// HTTP method of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical outbound request. Never mutated while it is being retried.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the dependency's base URL.
    pub path: String,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Per-attempt timeout overriding the dependency default.
    pub timeout: Option<Duration>,
}

impl Request {
    /// Creates a request without body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            timeout: None,
        }
    }

    /// `GET path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// `POST path` with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    /// `PUT path` with a JSON body.
    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    /// `DELETE path`
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attaches a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Overrides the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Per-attempt view handed to the transport, built fresh for every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    /// Dependency being called.
    pub dependency: String,
    /// Base URL of the dependency.
    pub base_url: String,
    /// 1-based attempt number; 1 is the initial attempt.
    pub number: u32,
    /// Deadline of this attempt.
    pub timeout: Duration,
}

impl AttemptContext {
    /// Retries already consumed before this attempt.
    pub fn retries(&self) -> u32 {
        self.number.saturating_sub(1)
    }

    /// Absolute target of `request` for this attempt.
    pub fn url(&self, request: &Request) -> String {
        join_url(&self.base_url, &request.path)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) if !base.is_empty() && !path.is_empty() => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Successful response of a dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON payload; `Null` when the body was empty.
    pub data: Value,
}

impl Response {
    /// Creates a response.
    pub fn new(status: u16, data: Value) -> Self {
        Self { status, data }
    }

    /// `200 OK` with `data`.
    pub fn ok(data: Value) -> Self {
        Self::new(200, data)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What went wrong at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The request was sent but nothing came back.
    NoResponse,
    /// The connection was aborted before the response completed.
    ConnectionAborted,
    /// The attempt ran past its deadline.
    TimedOut,
    /// The host name did not resolve.
    NameNotFound,
    /// The remote end refused the connection.
    ConnectionRefused,
    /// The remote end reset the connection.
    ConnectionReset,
    /// A response arrived with a non-success status.
    Http {
        /// HTTP status code.
        status: u16,
    },
}

/// Failure reported by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Failure category.
    pub kind: TransportErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Response body, when a response was received.
    pub body: Option<Value>,
}

impl TransportError {
    /// Creates an error without response body.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            body: None,
        }
    }

    /// Error for a response with a non-success status.
    pub fn http(status: u16, body: Option<Value>) -> Self {
        Self {
            kind: TransportErrorKind::Http { status },
            message: format!("request failed with status code {status}"),
            body,
        }
    }

    /// Error for an attempt that ran past `timeout`.
    pub fn timed_out(timeout: Duration) -> Self {
        Self::new(
            TransportErrorKind::TimedOut,
            format!("timeout of {}ms exceeded", timeout.as_millis()),
        )
    }

    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            TransportErrorKind::Http { status } => Some(status),
            _ => None,
        }
    }

    /// `message` field of a JSON error body, if the dependency sent one.
    pub fn body_message(&self) -> Option<&str> {
        self.body.as_ref()?.get("message")?.as_str()
    }
}

/// The network call primitive a resilient client drives.
///
/// Implementations perform exactly one attempt per `send`; retries, breaking and
/// error transformation happen above this trait.
pub trait Transport: Send + Sync + 'static {
    /// Performs one attempt of `request`.
    fn send<'a>(
        &'a self,
        request: &'a Request,
        attempt: &'a AttemptContext,
    ) -> BoxFuture<'a, Result<Response, TransportError>>;
}
