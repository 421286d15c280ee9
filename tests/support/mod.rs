#![allow(dead_code)]
//! Shared integration-test scaffolding: bind a real `rustle::Server` on an
//! ephemeral TCP port, connect a plain `tokio::net::TcpStream` against it,
//! and read back whatever the server wrote. Mirrors hyper's own
//! `tests/support/mod.rs` + `mod support;` split, adapted from hyper's
//! client/server harness to this crate's server-only surface.

use std::net::SocketAddr;
use std::time::Duration;

use rustle::events::NoopObserver;
use rustle::{Config, Handle, Pipeline, Routes, Server};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Binds `routes` under `config` on `127.0.0.1:0` and starts serving.
pub async fn start(routes: Routes, config: Config) -> (Handle, SocketAddr) {
    start_with_pipeline(routes, config, Pipeline::new()).await
}

/// Like [`start`], but with a caller-supplied exception pipeline.
pub async fn start_with_pipeline(routes: Routes, config: Config, pipeline: Pipeline) -> (Handle, SocketAddr) {
    let server = Server::bind_tcp(
        "127.0.0.1:0".parse().unwrap(),
        routes,
        config,
        pipeline,
        Arc::new(NoopObserver),
    )
    .await
    .expect("bind");
    let addr = match server.local_addr().unwrap() {
        rustle::server::LocalAddr::Tcp(a) => *a,
        #[cfg(unix)]
        _ => unreachable!(),
    };
    let handle = server.serve();
    (handle, addr)
}

/// Connects a plain TCP client to `addr`.
pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect")
}

/// Writes `request` and reads whatever the server sends back until the
/// connection goes quiet for `quiet_for` or is closed.
pub async fn roundtrip(addr: SocketAddr, request: &[u8], quiet_for: Duration) -> Vec<u8> {
    let mut client = connect(addr).await;
    client.write_all(request).await.unwrap();
    read_for(&mut client, quiet_for).await
}

/// Reads from `client` until it falls silent for `quiet_for` (or closes).
pub async fn read_for(client: &mut TcpStream, quiet_for: Duration) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut buf = [0u8; 4096];
        match tokio::time::timeout(quiet_for, client.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }
    out
}

/// True once the peer has fully closed the socket (a subsequent read
/// returns `Ok(0)`), used to assert persistence decisions.
pub async fn peer_closed(client: &mut TcpStream, within: Duration) -> bool {
    let mut buf = [0u8; 16];
    matches!(tokio::time::timeout(within, client.read(&mut buf)).await, Ok(Ok(0)))
}
