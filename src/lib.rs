//! An embeddable HTTP/1.0 and HTTP/1.1 server-side exchange library.
//!
//! `rustle` owns one bound socket's worth of request/response traffic:
//! parsing request heads off a connection, resolving them against a
//! route/action tree, driving an application-supplied handler and its
//! before/after actions, and writing the response back — with idle
//! timeouts, a path-lock registry for file-backed bodies, and a pluggable
//! exception pipeline for turning failures into responses. It does not
//! generate TLS, routing DSLs, or templating; those are composed on top.
//!
//! A minimal server:
//!
//! ```no_run
//! use std::sync::Arc;
//! use rustle::{Config, Pipeline, Response, Routes, Server};
//! use http::{Method, StatusCode};
//!
//! # async fn run() -> Result<(), rustle::Error> {
//! let mut routes = Routes::new();
//! routes.route("/hello", Method::GET, Arc::new(|_req| async {
//!     Response::text(StatusCode::OK, "hello")
//! })).unwrap();
//!
//! let server = Server::bind_tcp(
//!     "127.0.0.1:0".parse().unwrap(),
//!     routes,
//!     Config::default(),
//!     Pipeline::new(),
//!     Arc::new(rustle::events::NoopObserver),
//! ).await?;
//!
//! let handle = server.serve();
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod channel;
pub mod config;
pub mod date;
pub mod error;
pub mod events;
pub mod exception;
pub mod exchange;
pub mod head;
pub mod lock;
pub mod proto;
pub mod request;
pub mod response;
pub mod routing;
pub mod server;
pub mod timeout;

pub use body::outgoing::Body;
pub use channel::ChannelSender;
pub use config::{Builder, Config};
pub use error::{Error, Result};
pub use events::Observer;
pub use exception::{ExceptionHandler, Outcome, Pipeline};
pub use lock::PathLockRegistry;
pub use request::Request;
pub use response::Response;
pub use routing::{Action, BoxAction, BoxHandler, Handler, Routes};
pub use server::{Handle, LocalAddr, Listener, Server};
