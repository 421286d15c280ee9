//! The exception pipeline (component C7): maps an [`Error`] to a
//! [`Response`] through an application-supplied chain, terminated by a
//! default handler implementing a fixed error-to-status mapping table.
//!
//! Grounded on hyper's `error.rs` flat-`Kind` idiom — the default table
//! below dispatches on `Error::kind()` directly (visible to this crate's
//! own modules even though `Kind` stays `pub(crate)`) rather than stacking
//! up `is_*` predicate checks, mirroring how hyper's own internal call
//! sites (e.g. `proto/h1/dispatch.rs`) match `Kind` for precise branches
//! while external callers only ever see the predicates.

use std::sync::Arc;

use http::{Method, StatusCode};

use crate::error::{Error, Kind};
use crate::response::Response;

/// One link in the exception chain. A handler may return a response, hand
/// the same error onward (`None`), or surface a different error to
/// restart the chain from the top.
#[async_trait::async_trait]
pub trait ExceptionHandler: Send + Sync {
    async fn handle(&self, err: &Error, method: &Method) -> Outcome;
}

/// What an [`ExceptionHandler`] decided to do with one error.
pub enum Outcome {
    Respond(Response),
    /// Try the next handler in the chain with the same error.
    Continue,
    /// Restart the chain from the top with a different error.
    Replace(Error),
}

#[async_trait::async_trait]
impl<F, Fut> ExceptionHandler for F
where
    F: Fn(&Error, &Method) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Outcome> + Send,
{
    async fn handle(&self, err: &Error, method: &Method) -> Outcome {
        (self)(err, method).await
    }
}

/// An ordered chain of application handlers plus the built-in terminal
/// default. `max_error_responses` bounds how many times the chain may be
/// *restarted* (`Outcome::Replace`) for a single exchange's error before
/// giving up and falling back to the default table directly: each restart
/// counts as one invocation against `max_error_responses`.
#[derive(Default)]
pub struct Pipeline {
    handlers: Vec<Arc<dyn ExceptionHandler>>,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline::default()
    }

    pub fn push(&mut self, handler: Arc<dyn ExceptionHandler>) {
        self.handlers.push(handler);
    }

    /// Runs `err` through the chain, falling back to
    /// [`default_response_for`] if every handler declines (`Continue`) or
    /// the chain has been restarted `max_error_responses` times.
    pub async fn resolve(&self, mut err: Error, method: &Method, max_error_responses: u32, implement_missing_options: bool) -> Response {
        let mut restarts = 0u32;
        loop {
            for handler in &self.handlers {
                match handler.handle(&err, method).await {
                    Outcome::Respond(resp) => return resp,
                    Outcome::Continue => continue,
                    Outcome::Replace(new_err) => {
                        restarts += 1;
                        if restarts >= max_error_responses {
                            // The chain itself is the thing that exceeded the
                            // limit; report that, not whichever error was
                            // current when the cap hit.
                            drop(new_err);
                            return default_response_for(&Error::new_max_error_responses(), method, implement_missing_options);
                        }
                        err = new_err;
                        continue;
                    }
                }
            }
            return default_response_for(&err, method, implement_missing_options);
        }
    }
}

/// The terminal default handler, mapping each error kind to a status code
/// and response. Every response it builds sets `Content-Length: 0`.
pub fn default_response_for(err: &Error, method: &Method, implement_missing_options: bool) -> Response {
    use Kind::*;

    match err.kind() {
        BadHeader | RequestLineParseError | VersionParseError | IllegalRequestBody => zero_length(StatusCode::BAD_REQUEST),
        MaxHeadSize | MaxBody | MaxTrailers => zero_length(StatusCode::PAYLOAD_TOO_LARGE).header("Connection", &b"close"[..]),
        NoRouteFound => zero_length(StatusCode::NOT_FOUND),
        MethodNotAllowed if implement_missing_options && *method == Method::OPTIONS => {
            zero_length(StatusCode::NO_CONTENT).header("Allow", &b"OPTIONS"[..])
        }
        MethodNotAllowed => zero_length(StatusCode::METHOD_NOT_ALLOWED),
        MediaTypeUnsupported => zero_length(StatusCode::UNSUPPORTED_MEDIA_TYPE),
        VersionTooOld => zero_length(StatusCode::UPGRADE_REQUIRED).header("Upgrade", &b"HTTP/1.1"[..]),
        VersionTooNew => zero_length(StatusCode::HTTP_VERSION_NOT_SUPPORTED),
        IdleTimeoutRead => zero_length(StatusCode::REQUEST_TIMEOUT).header("Connection", &b"close"[..]),
        // A write timeout means "no response; close the connection" — the
        // exchange driver intercepts `is_timeout_write()` before the error
        // ever reaches the pipeline, so this arm is never actually hit.
        IdleTimeoutWrite => unreachable!("write timeouts never reach the exception pipeline"),
        MaxErrorResponses => zero_length(StatusCode::INTERNAL_SERVER_ERROR).header("Connection", &b"close"[..]),
        _ => zero_length(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn zero_length(status: StatusCode) -> Response {
    Response::new(status).header("Content-Length", &b"0"[..])
}

/// `MethodNotAllowed` carries the implemented-methods set separately
/// (the `Error` taxonomy only tags *which kind* of failure occurred, not
/// its payload); the exchange driver builds the `Allow` header for a
/// genuine 405 itself, from the route tree's `MethodNotAllowed` result,
/// before ever reaching the exception pipeline. This helper exists for
/// exception handlers that want the same formatting.
pub fn allow_header_value(methods: &[Method]) -> String {
    methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ")
}
