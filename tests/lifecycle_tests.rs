//! The lifecycle controller (component C11) driven end-to-end: `stop`
//! waits for in-flight exchanges, `kill` forces even a handler parked in
//! an unrelated sleep closed, and a stopped server refuses new
//! connections.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use rustle::{Config, Request, Response, Routes};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

struct SlowOk(Duration);
#[async_trait::async_trait]
impl rustle::routing::Handler for SlowOk {
    async fn call(&self, _req: Request) -> Response {
        tokio::time::sleep(self.0).await;
        Response::new(StatusCode::OK)
    }
}

struct SleepsForever;
#[async_trait::async_trait]
impl rustle::routing::Handler for SleepsForever {
    async fn call(&self, _req: Request) -> Response {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Response::new(StatusCode::OK)
    }
}

#[tokio::test]
async fn stop_waits_for_a_slow_handler_to_finish_before_returning() {
    let mut routes = Routes::new();
    routes.route("/slow", Method::GET, Arc::new(SlowOk(Duration::from_millis(100)))).unwrap();
    let (handle, addr) = support::start(routes, Config::default()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"GET /slow HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await.unwrap();
    // Give the exchange a moment to be accepted and the handler to start
    // before `stop` begins tearing down the accept loop.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(2), handle.stop()).await.expect("stop must not hang");
    assert!(started.elapsed() >= Duration::from_millis(90), "stop returned before the in-flight handler finished");

    let out = support::read_for(&mut client, Duration::from_millis(200)).await;
    assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 200"));
}

#[tokio::test]
async fn kill_returns_promptly_even_with_a_handler_stuck_in_an_unrelated_sleep() {
    let mut routes = Routes::new();
    routes.route("/stuck", Method::GET, Arc::new(SleepsForever)).unwrap();
    let (handle, addr) = support::start(routes, Config::default()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"GET /stuck HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    tokio::time::timeout(Duration::from_secs(1), handle.kill())
        .await
        .expect("kill must abort the stuck connection task rather than wait on it");

    // The server no longer bothers to write anything once killed.
    let out = support::read_for(&mut client, Duration::from_millis(100)).await;
    assert!(out.is_empty());
}

#[tokio::test]
async fn active_connections_counts_sockets_parked_mid_head_parse() {
    let (handle, addr) = support::start(Routes::new(), Config::default()).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        let client = TcpStream::connect(addr).await.unwrap();
        clients.push(client);
    }
    // Give each accepted socket time to register before sending anything;
    // none of them ever complete a request head.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(handle.active_connections(), 3);

    drop(clients);
    handle.kill().await;
}

#[tokio::test]
async fn stopped_server_refuses_further_connection_attempts() {
    let (handle, addr) = support::start(Routes::new(), Config::default()).await;
    assert!(handle.is_running());
    handle.stop().await;

    // The listening socket itself is gone once the accept loop exits.
    let result = tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await;
    assert!(matches!(result, Ok(Err(_))), "connecting to a stopped server's address should fail, got {result:?}");
}

#[tokio::test]
async fn stop_with_deadline_returns_once_a_quickly_finishing_handler_completes() {
    let mut routes = Routes::new();
    routes.route("/fast", Method::GET, Arc::new(SlowOk(Duration::from_millis(5)))).unwrap();
    let (handle, addr) = support::start(routes, Config::default()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"GET /fast HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle.stop_with_deadline(Duration::from_secs(5)))
        .await
        .expect("a handler that finishes well inside the deadline should not force anything");

    let out = support::read_for(&mut client, Duration::from_millis(200)).await;
    assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 200"));
}
