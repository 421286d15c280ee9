//! The byte source: a buffered, cancellable, timed byte stream over one
//! connection.
//!
//! Owns a fixed read buffer and a cursor into it, built directly on
//! `tokio::io::{AsyncRead, AsyncWrite}` and async/await.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;
use crate::timeout::IdleTimer;

/// The fixed inbound read-buffer size.
pub const INIT_BUFFER_SIZE: usize = 512;

/// The moderate write-chunk ceiling large responses are split into, so
/// no single write can spuriously exceed the idle deadline.
pub const WRITE_CHUNK_SIZE: usize = 16 * 1024;

/// Wraps a raw connection with a read buffer, idle-timeout enforcement,
/// and idempotent half-shutdown.
pub struct Buffered<T> {
    io: T,
    buf: BytesMut,
    timer: IdleTimer,
    read_shutdown: AtomicBool,
}

impl<T> Buffered<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T, timer: IdleTimer) -> Buffered<T> {
        Buffered {
            io,
            buf: BytesMut::with_capacity(INIT_BUFFER_SIZE),
            timer,
            read_shutdown: AtomicBool::new(false),
        }
    }

    /// Idempotently shuts down the read side. After this, all further
    /// reads return `Disconnect` immediately, without touching the
    /// underlying stream again.
    pub fn shutdown_read(&self) {
        self.read_shutdown.store(true, Ordering::SeqCst);
    }

    fn is_read_shutdown(&self) -> bool {
        self.read_shutdown.load(Ordering::SeqCst)
    }

    /// Reads more bytes from the connection into the internal buffer,
    /// under the idle-read timeout. Returns the number of bytes read (0
    /// at end of stream).
    async fn fill_buf(&mut self) -> Result<usize, Error> {
        if self.is_read_shutdown() {
            return Err(Error::new_disconnect());
        }
        let io = &mut self.io;
        let buf = &mut self.buf;
        self.timer
            .read(async move {
                let mut chunk = [0u8; INIT_BUFFER_SIZE];
                let n = io.read(&mut chunk).await.map_err(Error::new_io)?;
                buf.extend_from_slice(&chunk[..n]);
                Ok(n)
            })
            .await
    }

    /// Reads a single CRLF-terminated line (the terminator itself is
    /// consumed but not included in the returned bytes), enforcing `max`
    /// as the byte budget for the line including its terminator. Returns
    /// `Ok(None)` if the peer disconnects before any line is available.
    pub async fn read_line(&mut self, max: usize) -> Result<Option<Vec<u8>>, Error> {
        loop {
            if let Some(pos) = find_crlf(&self.buf) {
                if pos > max {
                    return Err(Error::new_max_head_size());
                }
                let line = self.buf.split_to(pos).to_vec();
                // drop the CRLF itself
                let _ = self.buf.split_to(2);
                return Ok(Some(line));
            }
            if self.buf.len() > max {
                return Err(Error::new_max_head_size());
            }
            let n = self.fill_buf().await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::new_disconnect());
            }
        }
    }

    /// Expects exactly `\r\n` as the next two bytes (used between chunk
    /// data and the next chunk-size line).
    pub async fn read_crlf(&mut self) -> Result<(), Error> {
        while self.buf.len() < 2 {
            let n = self.fill_buf().await?;
            if n == 0 {
                return Err(Error::new_disconnect());
            }
        }
        let crlf = self.buf.split_to(2);
        if &crlf[..] != b"\r\n" {
            return Err(Error::new_bad_header());
        }
        Ok(())
    }

    /// Fills `out` as far as possible from buffered + freshly read bytes,
    /// stopping at end of stream. Returns the number of bytes filled,
    /// which is less than `out.len()` only at end of stream.
    pub async fn read_exact_or_eof(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        let mut filled = 0;
        while filled < out.len() {
            if self.buf.is_empty() {
                let n = self.fill_buf().await?;
                if n == 0 {
                    break;
                }
            }
            let take = (out.len() - filled).min(self.buf.len());
            out[filled..filled + take].copy_from_slice(&self.buf[..take]);
            let _ = self.buf.split_to(take);
            filled += take;
        }
        Ok(filled)
    }

    /// Writes `data` to the connection in chunks no larger than
    /// `WRITE_CHUNK_SIZE`, each under its own idle-write timeout.
    pub async fn write_all_chunked(&mut self, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            let take = data.len().min(WRITE_CHUNK_SIZE);
            let (chunk, rest) = data.split_at(take);
            let io = &mut self.io;
            self.timer
                .write(async move { io.write_all(chunk).await.map_err(Error::new_io) })
                .await?;
            data = rest;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        let io = &mut self.io;
        self.timer.write(async move { io.flush().await.map_err(Error::new_io) }).await
    }

    pub async fn shutdown_write(&mut self) -> Result<(), Error> {
        self.io.shutdown().await.map_err(Error::new_io)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_a_line_without_its_terminator() {
        let (mut client, server) = duplex(64);
        client.write_all(b"hello\r\nworld").await.unwrap();
        let mut io = Buffered::new(server, IdleTimer::new(Duration::from_secs(1)));
        let line = io.read_line(100).await.unwrap().unwrap();
        assert_eq!(line, b"hello");
    }

    #[tokio::test]
    async fn oversize_line_is_max_head_size() {
        let (mut client, server) = duplex(64);
        client.write_all(b"this-line-is-too-long\r\n").await.unwrap();
        let mut io = Buffered::new(server, IdleTimer::new(Duration::from_secs(1)));
        let err = io.read_line(4).await.unwrap_err();
        assert!(err.is_resource_limit());
    }
}
