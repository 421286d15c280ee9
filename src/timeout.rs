//! The idle-timeout scheduler (component C8).
//!
//! Grounded on hyper's `common/timeout.rs` `Timeout` struct (a resettable
//! `tokio::time::Sleep` wrapping one duration per connection). A *fresh*
//! deadline is armed around each read or write — never reset
//! mid-operation — so this reduces to running the operation under
//! `tokio::time::timeout` with the configured duration; there is no
//! cross-operation state to carry beyond the duration itself.

use std::time::Duration;

use crate::error::Error;

/// Per-channel idle-timeout policy: one duration, applied fresh to every
/// read and every write.
#[derive(Debug, Clone, Copy)]
pub struct IdleTimer {
    duration: Duration,
}

impl IdleTimer {
    pub fn new(duration: Duration) -> IdleTimer {
        IdleTimer { duration }
    }

    /// Runs `fut`, the channel's next read. On expiry returns
    /// `Error::new_idle_timeout_read` without cancelling the caller's
    /// obligation to shut down the read side (the caller does that).
    pub async fn read<F, T>(&self, fut: F) -> Result<T, Error>
    where
        F: std::future::Future<Output = Result<T, Error>>,
    {
        match tokio::time::timeout(self.duration, fut).await {
            Ok(r) => r,
            Err(_elapsed) => Err(Error::new_idle_timeout_read()),
        }
    }

    /// Runs `fut`, the channel's next write. On expiry returns
    /// `Error::new_idle_timeout_write`. Large writes are therefore chunked
    /// (see `body::outgoing::FILE_CHUNK_SIZE`) so a single buffer write
    /// cannot spuriously exceed the deadline.
    pub async fn write<F, T>(&self, fut: F) -> Result<T, Error>
    where
        F: std::future::Future<Output = Result<T, Error>>,
    {
        match tokio::time::timeout(self.duration, fut).await {
            Ok(r) => r,
            Err(_elapsed) => Err(Error::new_idle_timeout_write()),
        }
    }
}
