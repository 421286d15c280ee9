//! The lifecycle controller: binds a listener, spawns one task per
//! accepted connection, and gives the caller a [`Handle`] to stop or
//! kill the whole thing from outside.
//!
//! The accept loop logs and continues past transient accept errors
//! instead of tearing the listener down. [`ConnectionRegistry`] below
//! lets every live connection be reached from outside the accept loop —
//! for graceful drain or forced teardown — built on `tokio::sync::Notify`
//! and an atomic connection count.

pub mod tcp;
#[cfg(unix)]
pub mod uds;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::Error;
use crate::events::Observer;
use crate::exception::Pipeline;
use crate::proto::h1::io::Buffered;
use crate::routing::Routes;

#[async_trait::async_trait]
trait ShutdownHandle: Send + Sync {
    async fn shutdown_read(&self);
    async fn shutdown_write(&self);
}

struct IoShutdown<T>(Arc<Mutex<Buffered<T>>>);

#[async_trait::async_trait]
impl<T> ShutdownHandle for IoShutdown<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn shutdown_read(&self) {
        self.0.lock().await.shutdown_read();
    }

    async fn shutdown_write(&self) {
        let _ = self.0.lock().await.shutdown_write().await;
    }
}

/// Tracks every in-flight connection so `Handle::stop` and `Handle::kill`
/// can reach it from outside the exchange driver: shut down its write half
/// past a graceful-stop deadline, or cancel its task outright on `kill`,
/// where a half-close isn't enough to unblock a connection parked in a
/// read that hasn't timed out yet.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    handles: StdMutex<HashMap<u64, Arc<dyn ShutdownHandle>>>,
    aborts: StdMutex<Vec<tokio::task::AbortHandle>>,
    active: AtomicUsize,
    idle: Notify,
}

/// A live connection's registration. Dropping it (normally when
/// `drive_connection` returns) deregisters the connection and, if this was
/// the last one, wakes anyone waiting in [`ConnectionRegistry::wait_idle`].
pub(crate) struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: u64,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::default())
    }

    pub(crate) fn register<T>(self: &Arc<Self>, io: Arc<Mutex<Buffered<T>>>) -> Registration
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().unwrap().insert(id, Arc::new(IoShutdown(io)));
        self.active.fetch_add(1, Ordering::SeqCst);
        Registration {
            registry: self.clone(),
            id,
        }
    }

    /// Records the task driving one connection, so `kill` can cancel it
    /// directly rather than wait on a half-close the task might not be
    /// polling for (e.g. parked in a read with no data pending).
    pub(crate) fn track_task(&self, abort: tokio::task::AbortHandle) {
        self.aborts.lock().unwrap().push(abort);
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Shuts down the write half of every still-registered connection. Once
    /// its next read or write observes the half-close, `drive_connection`
    /// unwinds and deregisters on its own.
    async fn shutdown_all_write(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap().values().cloned().collect();
        for h in handles {
            h.shutdown_write().await;
        }
    }

    /// Shuts down both halves of every still-registered connection, then
    /// cancels its task outright: a plain half-close can't unblock a
    /// connection parked in a read with no idle timeout due yet, and
    /// `kill` promises to return once every channel is closed, not once
    /// every channel's own timer gets around to noticing.
    async fn shutdown_all(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap().values().cloned().collect();
        for h in handles {
            h.shutdown_read().await;
            h.shutdown_write().await;
        }
        let aborts: Vec<_> = self.aborts.lock().unwrap().drain(..).collect();
        for abort in aborts {
            abort.abort();
        }
    }

    /// Waits until every registered connection has deregistered.
    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.handles.lock().unwrap().remove(&self.id);
        if self.registry.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.registry.idle.notify_waiters();
        }
    }
}

/// The bound socket kind this server accepts connections from: a TCP
/// listener, or (on Unix targets) a Unix domain socket listener.
pub enum Listener {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// Where a [`Listener`] is bound, for logging and for `Handle::local_addr`.
#[derive(Debug, Clone)]
pub enum LocalAddr {
    Tcp(std::net::SocketAddr),
    #[cfg(unix)]
    Unix(Option<std::path::PathBuf>),
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalAddr::Tcp(addr) => write!(f, "{addr}"),
            #[cfg(unix)]
            LocalAddr::Unix(Some(path)) => write!(f, "{}", path.display()),
            #[cfg(unix)]
            LocalAddr::Unix(None) => f.write_str("(unnamed unix socket)"),
        }
    }
}

impl Listener {
    fn local_addr(&self) -> Result<LocalAddr, Error> {
        match self {
            Listener::Tcp(l) => l.local_addr().map(LocalAddr::Tcp).map_err(Error::from),
            #[cfg(unix)]
            Listener::Unix(l) => Ok(LocalAddr::Unix(
                l.local_addr().ok().and_then(|a| a.as_pathname().map(|p| p.to_path_buf())),
            )),
        }
    }
}

/// An unstarted server: a bound listener plus the routing, configuration,
/// exception, and observer state every connection it accepts will share.
pub struct Server {
    listener: Listener,
    routes: Arc<Routes>,
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    observer: Arc<dyn Observer>,
}

impl Server {
    pub(crate) fn new(listener: Listener, routes: Routes, config: Config, pipeline: Pipeline, observer: Arc<dyn Observer>) -> Server {
        Server {
            listener,
            routes: Arc::new(routes),
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            observer,
        }
    }

    pub fn local_addr(&self) -> Result<LocalAddr, Error> {
        self.listener.local_addr()
    }

    /// Spawns the accept loop as a background task and returns a [`Handle`]
    /// for stopping or killing it. Each accepted connection is driven in
    /// its own task, wrapped once in [`crate::lock::with_owner`] so every
    /// exchange on that connection shares one path-lock owner identity.
    pub fn serve(self) -> Handle {
        let registry = ConnectionRegistry::new();
        let running = Arc::new(AtomicBool::new(true));
        let close = Arc::new(Notify::new());
        let local_addr = self.listener.local_addr();

        if let Ok(ref addr) = local_addr {
            self.observer.on_started(&addr.to_string());
        }

        let accept_task = spawn_accept_loop(
            self.listener,
            self.routes,
            self.config,
            self.pipeline,
            self.observer.clone(),
            registry.clone(),
            running.clone(),
            close.clone(),
        );

        Handle {
            registry,
            running,
            close,
            local_addr,
            accept_task: Some(accept_task),
            observer: self.observer,
        }
    }
}

fn spawn_accept_loop(
    listener: Listener,
    routes: Arc<Routes>,
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    observer: Arc<dyn Observer>,
    registry: Arc<ConnectionRegistry>,
    running: Arc<AtomicBool>,
    close: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match listener {
            Listener::Tcp(listener) => loop {
                tokio::select! {
                    _ = close.notified() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let _ = stream.set_nodelay(true);
                            trace!(%peer, "accepted connection");
                            spawn_connection(stream, &routes, &config, &pipeline, &observer, &registry);
                        }
                        Err(e) => debug!(error = %e, "accept failed"),
                    },
                }
            },
            #[cfg(unix)]
            Listener::Unix(listener) => loop {
                tokio::select! {
                    _ = close.notified() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _addr)) => {
                            spawn_connection(stream, &routes, &config, &pipeline, &observer, &registry);
                        }
                        Err(e) => debug!(error = %e, "accept failed"),
                    },
                }
            },
        }
        running.store(false, Ordering::SeqCst);
    })
}

fn spawn_connection<T>(
    io: T,
    routes: &Arc<Routes>,
    config: &Arc<Config>,
    pipeline: &Arc<Pipeline>,
    observer: &Arc<dyn Observer>,
    registry: &Arc<ConnectionRegistry>,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let routes = routes.clone();
    let config = config.clone();
    let pipeline = pipeline.clone();
    let observer = observer.clone();
    let registry = registry.clone();
    let track_in = registry.clone();
    let task = tokio::spawn(crate::lock::with_owner(crate::exchange::drive_connection(
        io,
        routes,
        config,
        pipeline,
        observer,
        Some(registry),
    )));
    track_in.track_task(task.abort_handle());
}

/// A running server. Dropping a `Handle` without calling `stop`/`kill`
/// leaves the accept loop and every in-flight connection running in the
/// background, detached.
pub struct Handle {
    registry: Arc<ConnectionRegistry>,
    running: Arc<AtomicBool>,
    close: Arc<Notify>,
    local_addr: Result<LocalAddr, Error>,
    accept_task: Option<JoinHandle<()>>,
    observer: Arc<dyn Observer>,
}

impl Handle {
    pub fn local_addr(&self) -> Result<&LocalAddr, &Error> {
        self.local_addr.as_ref()
    }

    /// `true` from the moment `serve` returns this handle until the accept
    /// loop has actually exited, after `stop`/`kill` is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_connections(&self) -> usize {
        self.registry.active_count()
    }

    /// Stops accepting new connections and waits for every in-flight
    /// exchange to finish and its connection to close on its own.
    pub async fn stop(mut self) {
        self.stop_accepting().await;
        self.registry.wait_idle().await;
        self.observer.on_stopped();
    }

    /// Like [`Handle::stop`], but if `deadline` elapses before every
    /// connection has closed on its own, forces the write half of every
    /// still-active connection closed so its next write observes the
    /// half-close and the exchange driver unwinds.
    pub async fn stop_with_deadline(mut self, deadline: Duration) {
        self.stop_accepting().await;
        if tokio::time::timeout(deadline, self.registry.wait_idle()).await.is_err() {
            self.registry.shutdown_all_write().await;
            self.registry.wait_idle().await;
        }
        self.observer.on_stopped();
    }

    /// Closes the listener and every channel immediately; returns once
    /// every connection has observed the forced shutdown and closed.
    pub async fn kill(mut self) {
        self.stop_accepting().await;
        self.registry.shutdown_all().await;
        self.registry.wait_idle().await;
        self.observer.on_stopped();
    }

    async fn stop_accepting(&mut self) {
        self.close.notify_waiters();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{Handler, Routes};
    use http::{Method, StatusCode};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    struct Ok200;
    #[async_trait::async_trait]
    impl Handler for Ok200 {
        async fn call(&self, _req: crate::request::Request) -> crate::response::Response {
            crate::response::Response::new(StatusCode::OK)
        }
    }

    async fn bound_server() -> Server {
        let listener = tcp::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut routes = Routes::new();
        routes.route("/hello", Method::GET, Arc::new(Ok200)).unwrap();
        Server::new(
            Listener::Tcp(listener),
            routes,
            Config::default(),
            Pipeline::new(),
            Arc::new(crate::events::NoopObserver),
        )
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_connections_to_close() {
        let server = bound_server().await;
        let addr = match server.local_addr().unwrap() {
            LocalAddr::Tcp(a) => *a,
            #[cfg(unix)]
            _ => unreachable!(),
        };
        let handle = server.serve();
        assert!(handle.is_running());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle.stop()).await.unwrap();
    }

    #[tokio::test]
    async fn kill_forces_active_connections_closed() {
        let server = bound_server().await;
        let addr = match server.local_addr().unwrap() {
            LocalAddr::Tcp(a) => *a,
            #[cfg(unix)]
            _ => unreachable!(),
        };
        let handle = server.serve();

        // A client that connects but never sends a full request head:
        // `kill` must still return promptly by forcing the read side
        // closed rather than waiting for this exchange to finish parsing.
        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), handle.kill()).await.unwrap();
    }

    #[tokio::test]
    async fn is_running_goes_false_once_stopped() {
        let server = bound_server().await;
        let handle = server.serve();
        let running = handle.running.clone();
        assert!(running.load(Ordering::SeqCst));
        handle.stop().await;
        assert!(!running.load(Ordering::SeqCst));
    }
}
