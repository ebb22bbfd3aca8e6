//! `reqwest`-backed [`Transport`].

use std::error::Error as _;
use std::io;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::transport::{
    AttemptContext, Method, Request, Response, Transport, TransportError, TransportErrorKind,
};

/// Sends requests with a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport around a preconfigured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a Request,
        attempt: &'a AttemptContext,
    ) -> BoxFuture<'a, Result<Response, TransportError>> {
        Box::pin(async move {
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Patch => reqwest::Method::PATCH,
                Method::Delete => reqwest::Method::DELETE,
            };

            let mut builder = self
                .client
                .request(method, attempt.url(request))
                .timeout(attempt.timeout);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(map_error)?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await.map_err(map_error)?;
            let data = decode_body(&bytes);

            if (200..300).contains(&status) {
                Ok(Response::new(status, data))
            } else {
                Err(TransportError::http(status, Some(data)))
            }
        })
    }
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn map_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::TimedOut
    } else if err.is_connect() {
        connect_kind(&err)
    } else if err.is_body() || err.is_decode() {
        // The response started but the body was cut off.
        TransportErrorKind::ConnectionReset
    } else {
        TransportErrorKind::NoResponse
    };
    TransportError::new(kind, err.to_string())
}

fn connect_kind(err: &reqwest::Error) -> TransportErrorKind {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            match io.kind() {
                io::ErrorKind::ConnectionRefused => return TransportErrorKind::ConnectionRefused,
                io::ErrorKind::ConnectionReset => return TransportErrorKind::ConnectionReset,
                io::ErrorKind::ConnectionAborted => return TransportErrorKind::ConnectionAborted,
                io::ErrorKind::TimedOut => return TransportErrorKind::TimedOut,
                _ => {}
            }
        }
        let text = cause.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return TransportErrorKind::NameNotFound;
        }
        source = cause.source();
    }
    TransportErrorKind::NoResponse
}
