//! TCP-bound servers.
//!
//! Binds a std listener, marks it non-blocking, and hands it to tokio.
//! No TCP keepalive tuning: nothing in the request/response model here
//! needs it.

use std::net::{SocketAddr, TcpListener as StdTcpListener};

use tokio::net::TcpListener;

use crate::config::Config;
use crate::error::Error;
use crate::events::Observer;
use crate::exception::Pipeline;
use crate::routing::Routes;
use crate::server::{Listener, Server};
use std::sync::Arc;

/// Binds a TCP listener at `addr`.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    let std_listener = StdTcpListener::bind(addr).map_err(Error::from)?;
    std_listener.set_nonblocking(true).map_err(Error::from)?;
    TcpListener::from_std(std_listener).map_err(Error::from)
}

impl Server {
    /// Binds a TCP listener at `addr` and builds a [`Server`] ready to
    /// [`Server::serve`].
    pub async fn bind_tcp(addr: SocketAddr, routes: Routes, config: Config, pipeline: Pipeline, observer: Arc<dyn Observer>) -> Result<Server, Error> {
        let listener = bind(addr).await?;
        Ok(Server::new(Listener::Tcp(listener), routes, config, pipeline, observer))
    }
}
