//! The channel writer: validates, auto-completes, and writes responses.
//!
//! Computes `Content-Length` when it's absent and the body length is
//! known, falling back to `Connection: close` for unknown-length HTTP/1.1
//! responses. The interim-response mechanism is a cheap, cloneable handle
//! the exchange driver hands to the handler while it alone retains the
//! single writer that actually touches the wire.
//!
//! `io` is an `Arc<tokio::sync::Mutex<..>>` rather than a borrowed
//! reference: the body reader (`body::incoming::Incoming`) needs to
//! trigger a lazy `100 Continue` through this same writer on first body
//! access, while the exchange driver still holds its own handle to write
//! the eventual final response. A bare `&mut` can't be shared between
//! those two owners across the `.await` points in between; the mutex
//! (locked only for the duration of one write) keeps the single-writer
//! invariant without fighting the borrow checker.

use std::sync::Arc;

use http::{Method, StatusCode};
use tokio::sync::Mutex;

use crate::body::{BodyStream, Length};
use crate::error::Error;
use crate::head::Version;
use crate::proto::h1::encode;
use crate::proto::h1::io::Buffered;
use crate::response::Response;

/// Per-exchange writer state; `consecutive_error_responses` and the
/// overall persistence decision live one level up, in `exchange`.
pub struct Channel<T> {
    io: Arc<Mutex<Buffered<T>>>,
    wrote_100_continue: bool,
    wrote_final: bool,
    bytes_written: u64,
    corrupt: bool,
    close_after_response: Option<&'static str>,
    last_status: Option<StatusCode>,
}

impl<T> Channel<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    pub fn new(io: Arc<Mutex<Buffered<T>>>) -> Channel<T> {
        Channel {
            io,
            wrote_100_continue: false,
            wrote_final: false,
            bytes_written: 0,
            corrupt: false,
            close_after_response: None,
            last_status: None,
        }
    }

    pub fn wrote_final(&self) -> bool {
        self.wrote_final
    }

    /// The status of the most recent response accepted by `write`, final
    /// or interim. Used by the exchange driver to track consecutive
    /// error responses even when a handler wrote the final response
    /// directly through its channel handle.
    pub fn last_status(&self) -> Option<StatusCode> {
        self.last_status
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    /// Idempotent. Causes the next (or current) final response to carry
    /// `Connection: close`.
    pub fn schedule_close(&mut self, reason: &'static str) {
        if self.close_after_response.is_none() {
            self.close_after_response = Some(reason);
        }
    }

    pub fn close_reason(&self) -> Option<&'static str> {
        self.close_after_response
    }

    /// Writes `response` to the wire, enforcing the full validation
    /// contract below. On success, returns the total bytes serialized.
    pub async fn write(
        &mut self,
        response: &Response,
        request_method: &Method,
        request_version: Version,
        discard_rejected_informational: bool,
    ) -> Result<u64, Error> {
        if self.corrupt || self.wrote_final {
            return Err(Error::new_illegal_state("exchange already finished"));
        }

        if response.is_final() && self.wrote_final {
            return Err(Error::new_illegal_state("final response already sent"));
        }

        if response.status == StatusCode::CONTINUE && self.wrote_100_continue {
            return Ok(0);
        }

        if response.is_interim() && request_version < Version::HTTP_11 {
            if discard_rejected_informational {
                return Ok(0);
            }
            return Err(Error::new_response_rejected());
        }

        let body_known_empty = response.body.length() == Length::Known(0);

        if (*request_method == Method::HEAD || request_method.as_str() == "CONNECT") && !body_known_empty {
            return Err(Error::new_illegal_response_body());
        }

        if matches!(
            response.status,
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED
        ) && !body_known_empty
        {
            return Err(Error::new_illegal_response_body());
        }
        if response.is_interim() && !body_known_empty {
            return Err(Error::new_illegal_response_body());
        }
        if response.is_interim() && response.headers.contains("content-length") {
            return Err(Error::new_illegal_response_body());
        }

        match self.write_unchecked(response, request_version).await {
            Ok(n) => {
                self.bytes_written += n;
                self.last_status = Some(response.status);
                if response.status == StatusCode::CONTINUE {
                    self.wrote_100_continue = true;
                }
                if response.is_final() {
                    self.wrote_final = true;
                }
                Ok(n)
            }
            Err(e) => {
                self.corrupt = true;
                Err(e)
            }
        }
    }

    async fn write_unchecked(&mut self, response: &Response, request_version: Version) -> Result<u64, Error> {
        let mut head = Vec::with_capacity(256);

        let length = response.body.length();
        let is_1xx = response.status.as_u16() < 200;
        let has_content_length = response.headers.contains("content-length");
        let has_transfer_encoding_chunked = response.headers.is_chunked();

        let mut extra_connection_close = false;

        if !is_1xx
            && !has_content_length
            && matches!(length, Length::Unknown)
            && !has_transfer_encoding_chunked
            && request_version >= Version::HTTP_11
        {
            extra_connection_close = true;
        }

        if request_version < Version::HTTP_11 {
            extra_connection_close = true;
        }
        if self.close_after_response.is_some() {
            extra_connection_close = true;
        }

        encode::encode_status_line(&mut head, request_version, response.status, response.reason.as_deref());
        encode::encode_headers(&mut head, &response.headers);
        if !is_1xx && !has_content_length {
            if let Length::Known(n) = length {
                let mut buf = itoa::Buffer::new();
                head.extend_from_slice(b"Content-Length: ");
                head.extend_from_slice(buf.format(n).as_bytes());
                head.extend_from_slice(b"\r\n");
            }
        }
        if extra_connection_close && !response.headers.contains("connection") {
            head.extend_from_slice(b"Connection: close\r\n");
        }
        if !response.headers.contains("date") {
            head.extend_from_slice(b"Date: ");
            head.extend_from_slice(crate::date::now().as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        encode::encode_head_terminator(&mut head);

        let mut total = head.len() as u64;
        let mut stream = response.body.open().await?;

        let mut io = self.io.lock().await;
        io.write_all_chunked(&head).await?;
        drop(io);

        while let Some(chunk) = stream.next_chunk().await? {
            total += chunk.len() as u64;
            let mut io = self.io.lock().await;
            io.write_all_chunked(&chunk).await?;
        }
        stream.close().await;
        self.io.lock().await.flush().await?;

        Ok(total)
    }
}

/// A type-erased handle to this exchange's one writer, handed to the
/// route handler alongside its [`crate::request::Request`] so it can emit
/// interim responses or an explicit final response. Before/after actions
/// never get one — see `request::Request::with_params`.
#[async_trait::async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, response: &Response) -> Result<u64, Error>;
}

/// The concrete [`ChannelSender`], generic over the connection's byte
/// source. Cheap to construct per exchange: it only borrows the shared
/// `Channel` already backing the final response write.
pub struct ChannelHandle<T> {
    channel: Arc<Mutex<Channel<T>>>,
    method: Method,
    version: Version,
    discard_rejected_informational: bool,
}

impl<T> ChannelHandle<T> {
    pub fn new(channel: Arc<Mutex<Channel<T>>>, method: Method, version: Version, discard_rejected_informational: bool) -> ChannelHandle<T> {
        ChannelHandle {
            channel,
            method,
            version,
            discard_rejected_informational,
        }
    }
}

#[async_trait::async_trait]
impl<T> ChannelSender for ChannelHandle<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send(&self, response: &Response) -> Result<u64, Error> {
        let mut channel = self.channel.lock().await;
        channel.write(response, &self.method, self.version, self.discard_rejected_informational).await
    }
}
