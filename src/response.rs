//! The response value. Responses are immutable: the same value may be
//! sent on multiple exchanges, concurrently.

use std::sync::Arc;

use http::StatusCode;

use crate::body::outgoing::Body;
use crate::head::Headers;

/// An immutable HTTP response. Cheap to clone (the body is an `Arc`).
#[derive(Clone)]
pub struct Response {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: Headers,
    pub body: Arc<Body>,
}

impl Response {
    pub fn new(status: StatusCode) -> Response {
        Response {
            status,
            reason: None,
            headers: Headers::new(),
            body: Arc::new(Body::empty()),
        }
    }

    pub fn with_body(status: StatusCode, body: Body) -> Response {
        Response {
            status,
            reason: None,
            headers: Headers::new(),
            body: Arc::new(body),
        }
    }

    pub fn text(status: StatusCode, text: impl Into<String>) -> Response {
        let mut resp = Response::with_body(status, Body::from_text(text));
        resp.headers.set("Content-Type", &b"text/plain; charset=utf-8"[..]);
        resp
    }

    pub fn header(mut self, name: impl Into<Box<str>>, value: impl Into<bytes::Bytes>) -> Response {
        self.headers.set(name, value);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Response {
        self.reason = Some(reason.into());
        self
    }

    /// 100-199 is non-final (interim); everything else is final.
    pub fn is_final(&self) -> bool {
        self.status.as_u16() >= 200
    }

    pub fn is_interim(&self) -> bool {
        !self.is_final()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_below_200_is_interim() {
        let r = Response::new(StatusCode::CONTINUE);
        assert!(r.is_interim());
        assert!(!r.is_final());
    }

    #[test]
    fn status_200_and_above_is_final() {
        assert!(Response::new(StatusCode::OK).is_final());
        assert!(Response::new(StatusCode::NOT_FOUND).is_final());
    }
}
