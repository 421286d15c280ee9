//! Unix-domain-socket-bound servers (`cfg(unix)`).
//!
//! Binds a std `UnixListener` and hands it to tokio, the same shape as
//! [`super::tcp::bind`].

use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;

use crate::config::Config;
use crate::error::Error;
use crate::events::Observer;
use crate::exception::Pipeline;
use crate::routing::Routes;
use crate::server::{Listener, Server};

/// Binds a Unix domain socket listener at `path`. Fails if `path` already
/// exists; callers that need to replace a stale socket file should remove
/// it themselves first.
pub async fn bind(path: impl AsRef<Path>) -> Result<UnixListener, Error> {
    let std_listener = StdUnixListener::bind(path).map_err(Error::from)?;
    std_listener.set_nonblocking(true).map_err(Error::from)?;
    UnixListener::from_std(std_listener).map_err(Error::from)
}

impl Server {
    /// Binds a Unix domain socket listener at `path` and builds a
    /// [`Server`] ready to [`Server::serve`].
    pub async fn bind_unix(path: impl AsRef<Path>, routes: Routes, config: Config, pipeline: Pipeline, observer: Arc<dyn Observer>) -> Result<Server, Error> {
        let listener = bind(path).await?;
        Ok(Server::new(Listener::Unix(listener), routes, config, pipeline, observer))
    }
}
