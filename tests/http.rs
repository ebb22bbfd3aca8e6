#![cfg(feature = "http")]

use outbound_guard::{
    classify, AttemptContext, FailureKind, HttpTransport, Request, Transport, TransportErrorKind,
};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn transport() -> HttpTransport {
    HttpTransport::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

fn attempt(base_url: &str) -> AttemptContext {
    AttemptContext {
        dependency: "payment-service".to_string(),
        base_url: base_url.to_string(),
        number: 1,
        timeout: Duration::from_secs(5),
    }
}

/// Serves one connection with a canned raw HTTP reply, then hangs up.
async fn serve_once(reply: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        socket.write_all(reply.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_refused_connection_is_mapped() {
    // Port 1 has no listener on loopback.
    let ctx = attempt("http://127.0.0.1:1");
    let request = Request::get("/charges");

    let err = transport().send(&request, &ctx).await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::ConnectionRefused);
    assert_eq!(classify(&err).kind, FailureKind::Connection);
}

#[tokio::test]
async fn test_unresolvable_host_is_mapped() {
    let ctx = attempt("http://payments.nonexistent.invalid");
    let request = Request::get("/charges");

    let err = transport().send(&request, &ctx).await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::NameNotFound);
    assert!(classify(&err).retryable);
}

#[tokio::test]
async fn test_error_status_carries_body() {
    let base = serve_once(
        "HTTP/1.1 503 Service Unavailable\r\ncontent-type: application/json\r\ncontent-length: 23\r\nconnection: close\r\n\r\n{\"message\":\"draining\"}\n",
    )
    .await;
    let request = Request::post("/charges", json!({ "amount": 1200 }));

    let err = transport().send(&request, &attempt(&base)).await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Http { status: 503 });
    assert_eq!(err.body_message(), Some("draining"));
}

#[tokio::test]
async fn test_truncated_body_is_a_reset_not_a_timeout() {
    let base = serve_once(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"chargeId\":",
    )
    .await;
    let request = Request::get("/charges/ch_1");

    let err = transport().send(&request, &attempt(&base)).await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::ConnectionReset);
    assert_eq!(classify(&err).kind, FailureKind::Connection);
}

#[tokio::test]
async fn test_success_decodes_json() {
    let base = serve_once(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 17\r\nconnection: close\r\n\r\n{\"status\":\"ok\"} \n",
    )
    .await;
    let request = Request::get("/health");

    let response = transport().send(&request, &attempt(&base)).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.data, json!({ "status": "ok" }));
}
