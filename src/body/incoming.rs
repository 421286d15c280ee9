//! The request body reader (component C3).
//!
//! Chooses chunked, length-delimited, or empty framing and exposes the
//! result as a [`BodyStream`]. Adapted from hyper's `proto/h1/decode.rs`
//! (`Kind::{Chunked, Length, Eof}`, the `CHUNKED_EXTENSIONS_LIMIT`
//! constant, draining to trailers after the terminating chunk), rewritten
//! as an async pull interface over this crate's own
//! `proto::h1::io::Buffered` byte source instead of hyper's poll-based
//! decoder.
//!
//! `io` is shared (`Arc<tokio::sync::Mutex<..>>`) rather than borrowed: a
//! lazily-sent `100 Continue` must go out the moment a handler first
//! touches an `Expect`-bearing body, and that send goes out through the
//! same [`crate::channel::Channel`] the exchange driver later uses for the
//! final response. Sharing the mutex (instead of an exclusive `&mut Conn`)
//! is what lets both sides exist at once; see `channel.rs`'s module doc
//! for the full rationale.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;

use crate::body::{BodyStream, Chunk, Length};
use crate::channel::Channel;
use crate::error::Error;
use crate::head::{Headers, Version};
use crate::proto::h1::io::Buffered;
use crate::response::Response;
use http::{Method, StatusCode};

/// Chunk-extension bytes are discarded but still count against this cap,
/// guarding against unbounded extension data.
const CHUNK_EXTENSIONS_LIMIT: usize = 1024 * 16;

#[derive(Debug)]
pub(crate) enum Framing {
    Empty,
    Length(u64),
    Chunked,
}

/// Decides how the body of `head` is framed, in priority order (chunked,
/// then content-length, then empty), returning a
/// `FramingConflict`/`BadHeader` error for malformed or contradictory
/// framing headers.
pub fn framing_for(headers: &Headers) -> Result<Framing, Error> {
    let chunked = headers.is_chunked();
    let length = headers.content_length();

    if chunked && length.is_some() {
        // Both present: per RFC 7230 §3.3.3 this is a smuggling hazard.
        return Err(Error::new_framing_conflict());
    }

    if chunked {
        return Ok(Framing::Chunked);
    }

    match length {
        Some(Ok(n)) => Ok(Framing::Length(n)),
        Some(Err(())) => Err(Error::new_bad_header()),
        None => Ok(Framing::Empty),
    }
}

enum State {
    Empty,
    Length { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkCrlf,
    Trailers,
    Done,
}

/// Shared context the body reader uses to emit a lazy `100 Continue`
/// through the exchange's one writer, the first time its body is
/// actually consumed.
pub struct ContinueTrigger<T> {
    pub channel: Arc<Mutex<Channel<T>>>,
    pub method: Method,
    pub version: Version,
}

/// The request body reader. Implements [`BodyStream`]; single-consumption
/// (at most one successful subscription per exchange) is enforced one
/// layer up, by `Request` only ever handing out one `Incoming` per
/// exchange.
pub struct Incoming<T> {
    io: Arc<Mutex<Buffered<T>>>,
    state: State,
    length: Length,
    max_trailers_size: usize,
    trailers: Headers,
    continue_trigger: Option<ContinueTrigger<T>>,
    continue_sent: bool,
}

impl<T> Incoming<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    pub fn new(
        io: Arc<Mutex<Buffered<T>>>,
        headers: &Headers,
        max_trailers_size: usize,
        continue_trigger: Option<ContinueTrigger<T>>,
    ) -> Result<Incoming<T>, Error> {
        let (state, length) = match framing_for(headers)? {
            Framing::Empty => (State::Empty, Length::Known(0)),
            Framing::Length(0) => (State::Empty, Length::Known(0)),
            Framing::Length(n) => (State::Length { remaining: n }, Length::Known(n)),
            Framing::Chunked => (State::ChunkSize, Length::Unknown),
        };
        Ok(Incoming {
            io,
            state,
            length,
            max_trailers_size,
            trailers: Headers::new(),
            continue_trigger,
            continue_sent: false,
        })
    }

    /// Trailers accumulated once the terminating chunk has been reached.
    /// Empty for non-chunked bodies.
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    async fn send_continue_if_pending(&mut self) -> Result<(), Error> {
        if self.continue_sent {
            return Ok(());
        }
        self.continue_sent = true;
        if let Some(trigger) = &self.continue_trigger {
            let resp = Response::new(StatusCode::CONTINUE);
            let mut channel = trigger.channel.lock().await;
            // Already sent eagerly, or the peer is HTTP/1.0: both are
            // handled by `Channel::write`'s own idempotency/rejection
            // rules, so failures here are swallowed rather than
            // propagated — a missed 100 Continue is the peer's problem,
            // not a reason to fail the body read.
            let _ = channel.write(&resp, &trigger.method, trigger.version, true).await;
        }
        Ok(())
    }

    async fn read_chunk_size_line(&mut self) -> Result<u64, Error> {
        let mut io = self.io.lock().await;
        let line = io.read_line(CHUNK_EXTENSIONS_LIMIT).await?;
        let line = line.ok_or_else(Error::new_disconnect)?;
        let size_part = line.split(|&b| b == b';').next().unwrap_or(&[]);
        let s = std::str::from_utf8(size_part).map_err(|_| Error::new_bad_header())?;
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::new_bad_header());
        }
        u64::from_str_radix(s, 16).map_err(|_| Error::new_bad_header())
    }

    async fn read_trailer_block(&mut self) -> Result<(), Error> {
        let mut total = 0usize;
        loop {
            let line = {
                let mut io = self.io.lock().await;
                io.read_line(self.max_trailers_size - total).await?
            };
            let line = match line {
                Some(l) => l,
                None => return Err(Error::new_disconnect()),
            };
            total += line.len() + 2;
            if total > self.max_trailers_size {
                return Err(Error::new_max_trailers());
            }
            if line.is_empty() {
                return Ok(());
            }
            let (name, value) = crate::proto::h1::parse::parse_header_line(&line).map_err(|_| Error::new_bad_header())?;
            self.trailers.append(name, Bytes::copy_from_slice(value));
        }
    }
}

#[async_trait::async_trait]
impl<T> BodyStream for Incoming<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn next_chunk(&mut self) -> Result<Option<Chunk>, Error> {
        if matches!(self.state, State::Length { .. } | State::ChunkSize) {
            self.send_continue_if_pending().await?;
        }
        loop {
            match self.state {
                State::Empty | State::Done => return Ok(None),
                State::Length { remaining } => {
                    if remaining == 0 {
                        self.state = State::Done;
                        return Ok(None);
                    }
                    let want = remaining.min(8192) as usize;
                    let mut buf = BytesMut::zeroed(want);
                    let n = {
                        let mut io = self.io.lock().await;
                        io.read_exact_or_eof(&mut buf).await?
                    };
                    if n == 0 {
                        return Err(Error::new_disconnect());
                    }
                    buf.truncate(n);
                    self.state = State::Length { remaining: remaining - n as u64 };
                    return Ok(Some(buf.freeze()));
                }
                State::ChunkSize => {
                    let size = self.read_chunk_size_line().await?;
                    if size == 0 {
                        self.state = State::Trailers;
                    } else {
                        self.state = State::ChunkData { remaining: size };
                    }
                }
                State::ChunkData { remaining } => {
                    let want = remaining.min(8192) as usize;
                    let mut buf = BytesMut::zeroed(want);
                    let n = {
                        let mut io = self.io.lock().await;
                        io.read_exact_or_eof(&mut buf).await?
                    };
                    if n == 0 {
                        return Err(Error::new_disconnect());
                    }
                    buf.truncate(n);
                    let remaining = remaining - n as u64;
                    self.state = if remaining == 0 { State::ChunkCrlf } else { State::ChunkData { remaining } };
                    return Ok(Some(buf.freeze()));
                }
                State::ChunkCrlf => {
                    self.io.lock().await.read_crlf().await?;
                    self.state = State::ChunkSize;
                }
                State::Trailers => {
                    self.read_trailer_block().await?;
                    self.state = State::Done;
                    return Ok(None);
                }
            }
        }
    }

    fn length(&self) -> Length {
        self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_chunked_and_content_length_together() {
        let mut h = Headers::new();
        h.append("Transfer-Encoding", &b"chunked"[..]);
        h.append("Content-Length", &b"5"[..]);
        assert!(framing_for(&h).is_err());
    }

    #[test]
    fn empty_when_no_framing_headers() {
        let h = Headers::new();
        assert!(matches!(framing_for(&h).unwrap(), Framing::Empty));
    }

    #[test]
    fn uses_content_length_when_present() {
        let mut h = Headers::new();
        h.append("Content-Length", &b"42"[..]);
        assert!(matches!(framing_for(&h).unwrap(), Framing::Length(42)));
    }

    #[tokio::test]
    async fn reads_length_delimited_body_over_shared_io() {
        use crate::timeout::IdleTimer;
        use std::time::Duration;
        use tokio::io::{duplex, AsyncWriteExt};

        let (mut client, server) = duplex(64);
        client.write_all(b"hello").await.unwrap();
        let io = Arc::new(Mutex::new(Buffered::new(server, IdleTimer::new(Duration::from_secs(1)))));
        let mut h = Headers::new();
        h.append("Content-Length", &b"5"[..]);
        let mut body = Incoming::new(io, &h, 8192, None).unwrap();
        let chunk = body.next_chunk().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert!(body.next_chunk().await.unwrap().is_none());
    }
}
