//! Body abstractions: [`Chunk`], and two duck-typed capability traits —
//! `Iterator<Chunk>` (finite, non-restartable) and
//! `Iterator<Chunk>+Closeable+Length` for resource-backed bodies.
//!
//! Grounded on hyper's `body/chunk.rs` (a `Bytes`-backed chunk type) and
//! `body/body.rs` (the `Body` trait), generalized from hyper's poll-based
//! `http_body::Body` into a simpler async pull interface since this crate
//! has no client or `tower` stack to interoperate with.

pub mod incoming;
pub mod outgoing;

use bytes::{Bytes, BytesMut};

use crate::error::Error;

/// A single owned chunk of body bytes. Fully owned by the caller between
/// acquisitions; a reader never hands back a partially consumed buffer.
pub type Chunk = Bytes;

/// The length of a body: either known non-negative, or a sentinel for
/// unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Known(u64),
    Unknown,
}

impl Length {
    pub fn known(self) -> Option<u64> {
        match self {
            Length::Known(n) => Some(n),
            Length::Unknown => None,
        }
    }

    pub fn is_known_zero(self) -> bool {
        matches!(self, Length::Known(0))
    }
}

/// A finite, non-restartable asynchronous sequence of byte chunks.
///
/// `next_chunk` returns `Ok(None)` at end of sequence. Implementations
/// that hold external resources (file handles, path locks) additionally
/// implement [`Closeable`].
#[async_trait::async_trait]
pub trait BodyStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>, Error>;

    /// Known or unknown total length, if determinable up front.
    fn length(&self) -> Length {
        Length::Unknown
    }
}

/// Resource-backed bodies (file-backed, in particular) must release any
/// held lock or file handle even if iteration ends early.
#[async_trait::async_trait]
pub trait Closeable {
    async fn close(&mut self);
}

/// Materializes `stream` into a single buffer, capped at `cap` bytes —
/// the buffered-conversion path (`Request::bytes`/`Request::text`) that
/// methods consuming the *whole* body use, as opposed to lazy chunk
/// iteration, which has no such cap. Exceeding `cap`, whether the length
/// was known up front or only discovered while accumulating, fails with
/// `Error::new_max_body()`.
pub async fn collect(stream: &mut dyn BodyStream, cap: u64) -> Result<Bytes, Error> {
    if let Length::Known(n) = stream.length() {
        if n > cap {
            return Err(Error::new_max_body());
        }
    }
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next_chunk().await? {
        if buf.len() as u64 + chunk.len() as u64 > cap {
            return Err(Error::new_max_body());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// A [`BodyStream`] shared between the receiver that subscribed to it and
/// the exchange driver's post-handler drain pass: the driver keeps its own
/// clone from construction, so it can finish reading
/// whatever a receiver left unconsumed once that receiver's future has
/// completed. Cheap to clone; the inner lock is only ever held across a
/// single `next_chunk` call, never for the clone's whole lifetime.
#[derive(Clone)]
pub struct SharedBody(std::sync::Arc<tokio::sync::Mutex<Box<dyn BodyStream>>>);

impl SharedBody {
    pub fn new(inner: Box<dyn BodyStream>) -> SharedBody {
        SharedBody(std::sync::Arc::new(tokio::sync::Mutex::new(inner)))
    }
}

#[async_trait::async_trait]
impl BodyStream for SharedBody {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>, Error> {
        self.0.lock().await.next_chunk().await
    }

    fn length(&self) -> Length {
        // `length` is synchronous; a stream mid-read (lock held elsewhere)
        // reports `Unknown` rather than blocking.
        self.0.try_lock().map(|g| g.length()).unwrap_or(Length::Unknown)
    }
}
