//! The per-connection exchange driver (component C6): parses one request
//! head at a time off a shared byte source, resolves it against the
//! route/action trees, drives the handler and action chain, writes the
//! response, and decides whether the connection survives for another
//! exchange, repeated until the connection closes.
//!
//! `drive_connection` does *not* wrap itself in [`crate::lock::with_owner`]
//! — the server (C11) does that once per accepted connection, at task
//! spawn time, so every exchange on that connection shares one lock-owner
//! identity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use tokio::sync::Mutex;

use crate::body::incoming::{ContinueTrigger, Incoming};
use crate::body::{BodyStream, Length, SharedBody};
use crate::channel::{Channel, ChannelHandle};
use crate::config::Config;
use crate::error::Error;
use crate::events::{Observer, Stats};
use crate::exception::{self, Pipeline};
use crate::head::{Headers, RequestHead, Version};
use crate::proto::h1::io::Buffered;
use crate::proto::h1::parse::parse_head;
use crate::request::{BodyHandle, Request};
use crate::response::Response;
use crate::routing::action::MatchedAction;
use crate::routing::tree::Resolution;
use crate::routing::{self, Routes};
use crate::timeout::IdleTimer;

/// Drives one accepted connection to completion: repeatedly parses a
/// request head, runs it through routing/actions/handler, writes the
/// response, and decides persistence, until the connection closes.
///
/// `registry`, when supplied, lets the lifecycle controller (C11) reach
/// this connection's byte source from the outside: `stop(deadline)` shuts
/// down its write half once the deadline passes, and `kill()` shuts down
/// both halves immediately. A bare `drive_connection` call (as in this
/// module's own tests) passes `None` and is ungoverned by either.
pub async fn drive_connection<T>(
    io: T,
    routes: Arc<Routes>,
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    observer: Arc<dyn Observer>,
    registry: Option<Arc<crate::server::ConnectionRegistry>>,
) where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let timer = IdleTimer::new(config.timeout_idle_connection());
    let io = Arc::new(Mutex::new(Buffered::new(io, timer)));
    let _registration = registry.map(|r| r.register(io.clone()));
    let (min_major, min_minor) = config.min_http_version();
    let min_version = Version {
        major: min_major,
        minor: min_minor,
    };

    let mut consecutive_error_responses: u32 = 0;

    loop {
        let parsed = {
            let mut guard = io.lock().await;
            parse_head(&mut guard, config.max_request_head_size(), min_version, Version::HTTP_11).await
        };

        let head = match parsed {
            Ok(Some(h)) => h,
            Ok(None) => break,
            Err(e) => {
                if e.is_disconnect() {
                    break;
                }
                // The head itself didn't parse: there is no reliable
                // position left in the stream to resume from, so this
                // exchange's error response is also this connection's
                // last.
                let channel = Arc::new(Mutex::new(Channel::new(io.clone())));
                let _ = write_pipeline_response(&channel, &Method::GET, Version::HTTP_11, &config, &pipeline, e).await;
                break;
            }
        };

        let started = Instant::now();
        observer.on_head_received(
            &head,
            Stats {
                bytes: 0,
                duration: Duration::ZERO,
            },
        );

        let version = head.version;
        let channel = Arc::new(Mutex::new(Channel::new(io.clone())));

        let response = run_exchange(&head, &routes, &config, &pipeline, &channel, io.clone()).await;

        let (bytes_written, last_status, close_reason) = {
            let ch = channel.lock().await;
            (ch.bytes_written(), ch.last_status(), ch.close_reason())
        };

        observer.on_response_sent(
            &response,
            Stats {
                bytes: bytes_written,
                duration: started.elapsed(),
            },
        );

        if let Some(status) = last_status {
            if status.is_client_error() || status.is_server_error() {
                consecutive_error_responses += 1;
            } else {
                consecutive_error_responses = 0;
            }
        }

        let should_close = version < Version::HTTP_11
            || close_reason.is_some()
            || has_close_token(&head.headers)
            || has_close_token(&response.headers)
            || consecutive_error_responses >= config.max_error_responses();

        if should_close {
            break;
        }
    }

    let mut guard = io.lock().await;
    let _ = guard.shutdown_write().await;
}

/// Runs one exchange's body framing, routing, before/handler/after
/// dispatch, and trailing body drain, returning the response sent (or the
/// one that would have been sent, if the write itself failed).
async fn run_exchange<T>(
    head: &RequestHead,
    routes: &Arc<Routes>,
    config: &Arc<Config>,
    pipeline: &Arc<Pipeline>,
    channel: &Arc<Mutex<Channel<T>>>,
    io: Arc<Mutex<Buffered<T>>>,
) -> Response
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let method = head.method.clone();
    let version = head.version;

    let wants_continue = version >= Version::HTTP_11
        && head
            .headers
            .get("expect")
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(|s| s.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false);

    let continue_trigger = if wants_continue {
        if config.immediately_continue_expect100() {
            let mut ch = channel.lock().await;
            let _ = ch
                .write(&Response::new(StatusCode::CONTINUE), &method, version, config.discard_rejected_informational())
                .await;
            None
        } else {
            Some(ContinueTrigger {
                channel: channel.clone(),
                method: method.clone(),
                version,
            })
        }
    } else {
        None
    };

    let incoming = match Incoming::new(io, &head.headers, config.max_request_trailers_size(), continue_trigger) {
        Ok(i) => i,
        Err(e) => {
            // The framing itself is unreadable; there is no safe point to
            // resume parsing from, so this connection closes after the
            // error response.
            let mut ch = channel.lock().await;
            ch.schedule_close("unparseable request body framing");
            drop(ch);
            return write_pipeline_response(channel, &method, version, config, pipeline, e).await;
        }
    };

    let has_body = !incoming.length().is_known_zero();
    let shared_body = SharedBody::new(Box::new(incoming));

    let response = if *method == Method::TRACE && has_body {
        write_pipeline_response(channel, &method, version, config, pipeline, Error::new_illegal_request_body()).await
    } else {
        run_route_and_actions(head, &method, version, routes, config, pipeline, channel, shared_body.clone()).await
    };

    drain_body(shared_body, channel).await;
    response
}

/// Resolves the route and action trees, runs before-actions, the route
/// handler, and after-actions, and writes whichever response comes out
/// the other end.
async fn run_route_and_actions<T>(
    head: &RequestHead,
    method: &Method,
    version: Version,
    routes: &Arc<Routes>,
    config: &Arc<Config>,
    pipeline: &Arc<Pipeline>,
    channel: &Arc<Mutex<Channel<T>>>,
    shared_body: SharedBody,
) -> Response
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let segments = routing::path_segments(&head.target);
    let resolved = routes.resolve(&head.target, method);

    let body_handle = Arc::new(std::sync::Mutex::new(BodyHandle::Available(shared_body)));
    let base_request = Request::new(head.clone(), body_handle, config.max_request_body_buffer_size());

    let (handler, route_params) = match resolved.route {
        Resolution::Matched(m) => (Arc::clone(m.handler), m.params),
        Resolution::MethodNotAllowed(methods) => {
            return write_method_not_allowed(channel, method, version, config, pipeline, &methods).await;
        }
        Resolution::NoRouteFound => {
            return write_pipeline_response(channel, method, version, config, pipeline, Error::new_no_route_found()).await;
        }
    };

    for action in &resolved.before {
        let params = routing::params_for_pattern(&action.pattern, &segments);
        let view = base_request.with_params(params);
        if let Some(response) = action.action.call(view).await {
            return run_after_actions_and_write(response, resolved.after, &segments, &base_request, channel, method, version, config, pipeline).await;
        }
    }

    let sender = Arc::new(ChannelHandle::new(channel.clone(), method.clone(), version, config.discard_rejected_informational()));
    let handler_view = base_request.with_params(route_params).with_interim(sender);
    let handler_response = handler.call(handler_view).await;

    let wrote_directly = channel.lock().await.wrote_final();
    if wrote_directly {
        // The handler already sent its own final response through the
        // channel handle. After-actions still run (for any side effects
        // they have), but their return value has nowhere left to go.
        for action in resolved.after {
            let params = routing::params_for_pattern(&action.pattern, &segments);
            let view = base_request.with_params(params);
            let _ = action.action.call(view).await;
        }
        return handler_response;
    }

    run_after_actions_and_write(handler_response, resolved.after, &segments, &base_request, channel, method, version, config, pipeline).await
}

/// Runs the after-action chain (each may replace the response in flight),
/// then writes whatever remains.
#[allow(clippy::too_many_arguments)]
async fn run_after_actions_and_write<T>(
    mut response: Response,
    after: Vec<MatchedAction>,
    segments: &[String],
    base_request: &Request,
    channel: &Arc<Mutex<Channel<T>>>,
    method: &Method,
    version: Version,
    config: &Arc<Config>,
    pipeline: &Arc<Pipeline>,
) -> Response
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    for action in after {
        let params = routing::params_for_pattern(&action.pattern, segments);
        let view = base_request.with_params(params);
        if let Some(replacement) = action.action.call(view).await {
            response = replacement;
        }
    }

    let mut ch = channel.lock().await;
    if ch.wrote_final() {
        return response;
    }
    if let Err(e) = ch.write(&response, method, version, config.discard_rejected_informational()).await {
        ch.schedule_close("final response failed to write");
        if e.is_timeout_write() {
            // The peer stopped reading; there is no one left to send an
            // error response to, and the pipeline must not run (it may
            // have side effects like logging) for a failure that stays
            // silent by contract.
            return response;
        }
        let resolved = pipeline.resolve(e, method, config.max_error_responses(), config.implement_missing_options()).await;
        // The failed write above may not have touched the wire at all (an
        // illegal-response-body rejection, say) — the channel is still
        // writable and the client deserves the real error response. If
        // the channel is already corrupt from a partial write instead,
        // this second attempt just fails again and nothing is sent.
        let _ = ch.write(&resolved, method, version, config.discard_rejected_informational()).await;
        return resolved;
    }
    response
}

/// Resolves `err` through the exception pipeline and writes the result,
/// unless the channel already carries a final response (nothing left to
/// send). Used for every error path that short-circuits before routing
/// ever gets a handler involved.
async fn write_pipeline_response<T>(
    channel: &Arc<Mutex<Channel<T>>>,
    method: &Method,
    version: Version,
    config: &Arc<Config>,
    pipeline: &Arc<Pipeline>,
    err: Error,
) -> Response
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    if err.is_timeout_write() {
        // No response; the pipeline must not run for a failure that
        // stays silent by contract.
        let mut ch = channel.lock().await;
        ch.schedule_close("write timed out");
        return Response::new(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let resp = pipeline.resolve(err, method, config.max_error_responses(), config.implement_missing_options()).await;
    let mut ch = channel.lock().await;
    if !ch.wrote_final() {
        if ch.write(&resp, method, version, config.discard_rejected_informational()).await.is_err() {
            ch.schedule_close("error response failed to write");
        }
    }
    resp
}

/// `MethodNotAllowed` needs the route tree's own implemented-methods list
/// folded into the `Allow` header before the response is ever written —
/// `default_response_for` can't do this itself (see its doc comment).
async fn write_method_not_allowed<T>(
    channel: &Arc<Mutex<Channel<T>>>,
    method: &Method,
    version: Version,
    config: &Arc<Config>,
    pipeline: &Arc<Pipeline>,
    methods: &[Method],
) -> Response
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let mut resp = pipeline
        .resolve(Error::new_method_not_allowed(), method, config.max_error_responses(), config.implement_missing_options())
        .await;
    if matches!(resp.status, StatusCode::METHOD_NOT_ALLOWED | StatusCode::NO_CONTENT) {
        resp = resp.header("Allow", exception::allow_header_value(methods));
    }
    let mut ch = channel.lock().await;
    if !ch.wrote_final() {
        if ch.write(&resp, method, version, config.discard_rejected_informational()).await.is_err() {
            ch.schedule_close("error response failed to write");
        }
    }
    resp
}

/// Reads `body` to completion, discarding what it yields: unread body
/// bytes must be drained before the next head parse. If the body was
/// never consumed this is just the original stream run to its end; if a
/// receiver already finished reading it, this returns
/// immediately. A drain failure schedules the connection closed rather
/// than propagating, since the response has already been decided.
async fn drain_body<T>(mut body: SharedBody, channel: &Arc<Mutex<Channel<T>>>)
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        match body.next_chunk().await {
            Ok(Some(_)) => continue,
            Ok(None) => return,
            Err(_) => {
                channel.lock().await.schedule_close("unread request body could not be drained");
                return;
            }
        }
    }
}

/// True if `headers`' `Connection` header (any occurrence, comma-split)
/// contains the `close` token, case-insensitively.
fn has_close_token(headers: &Headers) -> bool {
    headers.get_all("connection").any(|v| {
        std::str::from_utf8(v)
            .map(|s| s.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("close")))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{Action, Handler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    struct Ok200;
    #[async_trait::async_trait]
    impl Handler for Ok200 {
        async fn call(&self, _req: Request) -> Response {
            Response::text(StatusCode::OK, "hi")
        }
    }

    struct Echo;
    #[async_trait::async_trait]
    impl Handler for Echo {
        async fn call(&self, req: Request) -> Response {
            let mut body = req.take_body().unwrap();
            let mut all = Vec::new();
            while let Ok(Some(chunk)) = body.next_chunk().await {
                all.extend_from_slice(&chunk);
            }
            Response::text(StatusCode::OK, String::from_utf8_lossy(&all).into_owned())
        }
    }

    fn base_config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    async fn run_once(routes: Routes, request_bytes: &[u8]) -> Vec<u8> {
        let (mut client, server) = duplex(8192);
        client.write_all(request_bytes).await.unwrap();

        let routes = Arc::new(routes);
        let config = base_config();
        let pipeline = Arc::new(Pipeline::new());
        let observer: Arc<dyn Observer> = Arc::new(crate::events::NoopObserver);

        let handle = tokio::spawn(drive_connection(server, routes, config, pipeline, observer, None));
        drop(client.shutdown().await);

        let mut out = Vec::new();
        let _ = tokio::time::timeout(Duration::from_millis(200), client.read_to_end(&mut out)).await;
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
        out
    }

    #[tokio::test]
    async fn matched_route_returns_its_response() {
        let mut routes = Routes::new();
        routes.route("/hello", Method::GET, Arc::new(Ok200)).unwrap();
        let out = run_once(routes, b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.ends_with("hi"));
    }

    #[tokio::test]
    async fn unmatched_path_is_404() {
        let routes = Routes::new();
        let out = run_once(routes, b"GET /nope HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow_header() {
        let mut routes = Routes::new();
        routes.route("/hello", Method::GET, Arc::new(Ok200)).unwrap();
        let out = run_once(routes, b"POST /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 405"));
        assert!(text.to_lowercase().contains("allow: get"));
    }

    #[tokio::test]
    async fn trace_with_body_is_400() {
        let mut routes = Routes::new();
        routes.route("/hello", Method::TRACE, Arc::new(Ok200)).unwrap();
        let out = run_once(
            routes,
            b"TRACE /hello HTTP/1.1\r\nHost: x\r\nContent-Length: 2\r\nConnection: close\r\n\r\nhi",
        )
        .await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn handler_reads_full_request_body() {
        let mut routes = Routes::new();
        routes.route("/echo", Method::POST, Arc::new(Echo)).unwrap();
        let out = run_once(
            routes,
            b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.ends_with("hello"));
    }

    #[tokio::test]
    async fn unread_body_is_drained_before_second_exchange_on_keep_alive() {
        let mut routes = Routes::new();
        routes.route("/hello", Method::POST, Arc::new(Ok200)).unwrap();
        // First request's body is never touched by the handler; the
        // second request on the same connection must still parse
        // correctly, which only happens if the first body was drained.
        let out = run_once(
            routes,
            b"POST /hello HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhelloGET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;
        let responses = String::from_utf8_lossy(&out).matches("HTTP/1.1 200").count();
        assert_eq!(responses, 2);
    }

    #[tokio::test]
    async fn http10_request_closes_after_one_exchange() {
        let mut routes = Routes::new();
        routes.route("/hello", Method::GET, Arc::new(Ok200)).unwrap();
        let out = run_once(routes, b"GET /hello HTTP/1.0\r\nHost: x\r\n\r\n").await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.0 200"));
        assert!(text.contains("Connection: close"));
    }

    #[tokio::test]
    async fn before_action_can_short_circuit_the_handler() {
        struct Deny;
        #[async_trait::async_trait]
        impl Action for Deny {
            async fn call(&self, _req: Request) -> Option<Response> {
                Some(Response::new(StatusCode::FORBIDDEN))
            }
        }
        static HANDLER_CALLS: AtomicUsize = AtomicUsize::new(0);
        struct CountingHandler;
        #[async_trait::async_trait]
        impl Handler for CountingHandler {
            async fn call(&self, _req: Request) -> Response {
                HANDLER_CALLS.fetch_add(1, Ordering::SeqCst);
                Response::new(StatusCode::OK)
            }
        }

        let mut routes = Routes::new();
        routes.route("/hello", Method::GET, Arc::new(CountingHandler)).unwrap();
        routes.before("/hello", Arc::new(Deny)).unwrap();
        let out = run_once(routes, b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 403"));
        assert_eq!(HANDLER_CALLS.load(Ordering::SeqCst), 0);
    }
}
