//! The exception pipeline driven end-to-end through a real
//! bound server, exercising `Outcome::Respond`/`Continue`/`Replace` and
//! the `max_error_responses` restart cap the default table alone can't
//! show.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use rustle::exception::{ExceptionHandler, Outcome};
use rustle::{Config, Error, Pipeline, Response, Routes};

#[tokio::test]
async fn custom_handler_overrides_the_default_404() {
    struct TeapotNotFound;
    #[async_trait::async_trait]
    impl ExceptionHandler for TeapotNotFound {
        async fn handle(&self, err: &Error, _method: &Method) -> Outcome {
            if err.is_resolution() {
                Outcome::Respond(Response::text(StatusCode::IM_A_TEAPOT, "nothing here, try tea"))
            } else {
                Outcome::Continue
            }
        }
    }

    let mut pipeline = Pipeline::new();
    pipeline.push(Arc::new(TeapotNotFound));
    let (handle, addr) = support::start_with_pipeline(Routes::new(), Config::default(), pipeline).await;

    let out = support::roundtrip(addr, b"GET /missing HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", Duration::from_millis(200)).await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 418"));
    assert!(text.ends_with("nothing here, try tea"));

    handle.kill().await;
}

#[tokio::test]
async fn declining_handler_falls_through_to_the_default_table() {
    struct AlwaysDecline;
    #[async_trait::async_trait]
    impl ExceptionHandler for AlwaysDecline {
        async fn handle(&self, _err: &Error, _method: &Method) -> Outcome {
            Outcome::Continue
        }
    }

    let mut pipeline = Pipeline::new();
    pipeline.push(Arc::new(AlwaysDecline));
    let (handle, addr) = support::start_with_pipeline(Routes::new(), Config::default(), pipeline).await;

    let out = support::roundtrip(addr, b"GET /missing HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", Duration::from_millis(200)).await;
    assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 404"));

    handle.kill().await;
}

/// `Outcome::Replace` restarts the chain with a different error; a
/// handler that replaces forever is capped by `max_error_responses` and
/// reports the cap itself rather than looping indefinitely.
#[tokio::test]
async fn replace_loop_is_capped_and_reports_the_cap_error() {
    static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

    struct AlwaysReplace;
    #[async_trait::async_trait]
    impl ExceptionHandler for AlwaysReplace {
        async fn handle(&self, _err: &Error, _method: &Method) -> Outcome {
            ATTEMPTS.fetch_add(1, Ordering::SeqCst);
            Outcome::Replace(Error::new_user("forced replacement"))
        }
    }

    let mut pipeline = Pipeline::new();
    pipeline.push(Arc::new(AlwaysReplace));
    let config = Config::builder().max_error_responses(2).build();
    let (handle, addr) = support::start_with_pipeline(Routes::new(), config, pipeline).await;

    let out = support::roundtrip(addr, b"GET /missing HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", Duration::from_millis(200)).await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("HTTP/1.1 500"));
    assert!(text.to_lowercase().contains("connection: close"));
    assert!(ATTEMPTS.load(Ordering::SeqCst) >= 2);

    handle.kill().await;
}

/// The first handler to respond wins; handlers after it in the chain are
/// never consulted.
#[tokio::test]
async fn first_responding_handler_short_circuits_the_rest_of_the_chain() {
    static SECOND_HANDLER_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct RespondsImmediately;
    #[async_trait::async_trait]
    impl ExceptionHandler for RespondsImmediately {
        async fn handle(&self, _err: &Error, _method: &Method) -> Outcome {
            Outcome::Respond(Response::new(StatusCode::ACCEPTED))
        }
    }

    struct NeverReached;
    #[async_trait::async_trait]
    impl ExceptionHandler for NeverReached {
        async fn handle(&self, _err: &Error, _method: &Method) -> Outcome {
            SECOND_HANDLER_CALLS.fetch_add(1, Ordering::SeqCst);
            Outcome::Respond(Response::new(StatusCode::IM_A_TEAPOT))
        }
    }

    let mut pipeline = Pipeline::new();
    pipeline.push(Arc::new(RespondsImmediately));
    pipeline.push(Arc::new(NeverReached));
    let (handle, addr) = support::start_with_pipeline(Routes::new(), Config::default(), pipeline).await;

    let out = support::roundtrip(addr, b"GET /missing HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", Duration::from_millis(200)).await;
    assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 202"));
    assert_eq!(SECOND_HANDLER_CALLS.load(Ordering::SeqCst), 0);

    handle.kill().await;
}

/// A 405 that reaches the pipeline still gets the route tree's own
/// `Allow` header folded in, even when a custom handler built the 405.
#[tokio::test]
async fn custom_handler_responding_to_method_not_allowed_still_gets_allow_header() {
    struct PlainFiveOhFive;
    #[async_trait::async_trait]
    impl ExceptionHandler for PlainFiveOhFive {
        async fn handle(&self, err: &Error, _method: &Method) -> Outcome {
            if err.is_resolution() {
                Outcome::Respond(Response::new(StatusCode::METHOD_NOT_ALLOWED))
            } else {
                Outcome::Continue
            }
        }
    }

    let mut routes = Routes::new();
    routes.route("/widgets", Method::GET, Arc::new(|_req: rustle::Request| async { Response::new(StatusCode::OK) })).unwrap();
    let mut pipeline = Pipeline::new();
    pipeline.push(Arc::new(PlainFiveOhFive));
    let (handle, addr) = support::start_with_pipeline(routes, Config::default(), pipeline).await;

    let out = support::roundtrip(addr, b"POST /widgets HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n", Duration::from_millis(200)).await;
    let text = String::from_utf8_lossy(&out).to_lowercase();
    assert!(text.starts_with("http/1.1 405"));
    assert!(text.contains("allow: get"));

    handle.kill().await;
}
