//! The path lock registry: an in-process, multiple-reader / single-writer
//! lock keyed by absolute path.
//!
//! `tokio::sync::RwLock` does not expose owner tracking, upgrade
//! detection, or acquire timeouts with the error semantics this needs, so
//! this is a small custom primitive: an async-aware read/write lock
//! combined with `tokio::task_local!` to give each exchange a stable
//! owner identity across `.await` points, which is what lets a
//! same-owner read-to-write attempt be detected and rejected.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::Error;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static OWNER: u64;
}

/// Runs `fut` with a freshly allocated lock-owner identity bound for its
/// duration. The server wraps each connection task in this once, at task
/// spawn time, so every exchange on that connection shares one owner
/// identity.
pub async fn with_owner<F: std::future::Future>(fut: F) -> F::Output {
    let id = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
    OWNER.scope(id, fut).await
}

fn current_owner() -> u64 {
    OWNER.try_with(|&id| id).unwrap_or_else(|_| {
        // Not inside `with_owner` (e.g. a test calling the registry
        // directly); fall back to a fresh id per call so behavior stays
        // well-defined rather than panicking.
        NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
    })
}

#[derive(Default)]
struct EntryState {
    readers: HashSet<u64>,
    writer: Option<u64>,
    waiting_writers: u64,
}

struct Entry {
    state: Mutex<EntryState>,
    notify: Notify,
}

/// The process-global path-lock map.
#[derive(Default)]
pub struct PathLockRegistry {
    entries: Mutex<HashMap<PathBuf, Arc<Entry>>>,
}

/// A held lock handle. Releasing is idempotent for the owning task;
/// dropping the guard without an explicit `release()` also releases.
pub struct LockGuard {
    registry: Arc<PathLockRegistry>,
    path: PathBuf,
    owner: u64,
    kind: Kind,
    released: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Read,
    Write,
}

impl PathLockRegistry {
    pub fn new() -> Arc<PathLockRegistry> {
        Arc::new(PathLockRegistry::default())
    }

    fn entry_for(&self, path: &Path) -> Arc<Entry> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                Arc::new(Entry {
                    state: Mutex::new(EntryState::default()),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    fn remove_if_empty(&self, path: &Path, entry: &Arc<Entry>) {
        let mut entries = self.entries.lock().unwrap();
        // Only drop the map's reference if nobody else has (re-)installed
        // a different `Entry` for this path and this one is now idle and
        // otherwise unreferenced. Racing re-creation resolves in favor of
        // whichever primitive is installed most recently.
        if let Some(current) = entries.get(path) {
            if Arc::ptr_eq(current, entry) {
                let st = entry.state.lock().unwrap();
                if st.readers.is_empty() && st.writer.is_none() {
                    entries.remove(path);
                }
            }
        }
    }

    /// Acquires a read lock on `path`, bounded by `timeout`.
    pub async fn acquire_read(self: Arc<Self>, path: &Path, timeout: Duration) -> Result<LockGuard, Error> {
        self.acquire(path, Kind::Read, timeout).await
    }

    /// Acquires a write lock on `path`, bounded by `timeout`.
    pub async fn acquire_write(self: Arc<Self>, path: &Path, timeout: Duration) -> Result<LockGuard, Error> {
        self.acquire(path, Kind::Write, timeout).await
    }

    async fn acquire(self: Arc<Self>, path: &Path, kind: Kind, timeout: Duration) -> Result<LockGuard, Error> {
        let owner = current_owner();
        let entry = self.entry_for(path);

        {
            let st = entry.state.lock().unwrap();
            if kind == Kind::Write && st.readers.contains(&owner) {
                return Err(Error::new_illegal_lock_upgrade());
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut st = entry.state.lock().unwrap();
                let can_acquire = match kind {
                    Kind::Read => st.writer.is_none() && st.waiting_writers == 0,
                    Kind::Write => st.writer.is_none() && st.readers.is_empty(),
                };
                if can_acquire {
                    match kind {
                        Kind::Read => {
                            st.readers.insert(owner);
                        }
                        Kind::Write => {
                            st.writer = Some(owner);
                        }
                    }
                    drop(st);
                    return Ok(LockGuard {
                        registry: self.clone(),
                        path: path.to_path_buf(),
                        owner,
                        kind,
                        released: false,
                    });
                }
                if kind == Kind::Write {
                    st.waiting_writers += 1;
                }
            }

            let wait = tokio::time::timeout_at(deadline, entry.notify.notified()).await;

            if kind == Kind::Write {
                let mut st = entry.state.lock().unwrap();
                st.waiting_writers = st.waiting_writers.saturating_sub(1);
            }

            if wait.is_err() {
                return Err(Error::new_lock_timeout());
            }
        }
    }
}

impl LockGuard {
    /// Releases the lock. Idempotent: calling this more than once, or
    /// dropping after calling it, is a NOP. This method is only callable
    /// by the owning task; there is no way to construct a `LockGuard` for
    /// any owner but the caller that acquired it, so "release by a
    /// non-owner" can only be observed via `release_as`.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let entry = self.registry.entry_for(&self.path);
        {
            let mut st = entry.state.lock().unwrap();
            match self.kind {
                Kind::Read => {
                    st.readers.remove(&self.owner);
                }
                Kind::Write => {
                    if st.writer == Some(self.owner) {
                        st.writer = None;
                    }
                }
            }
        }
        entry.notify.notify_waiters();
        self.registry.remove_if_empty(&self.path, &entry);
    }

    /// Testing/diagnostic hook: attempts to release on behalf of `owner`,
    /// which only succeeds if it matches the lock's true owner. On
    /// failure the guard is left untouched, still held by its real owner,
    /// who may release it normally later.
    pub fn release_as(&mut self, owner: u64) -> Result<(), Error> {
        if owner != self.owner {
            return Err(Error::new_illegal_monitor_state());
        }
        self.release_inner();
        Ok(())
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[tokio::test]
    async fn multiple_readers_share_access() {
        let reg = PathLockRegistry::new();
        let p = Path::new("/tmp/a");
        let g1 = reg.clone().acquire_read(p, Duration::from_millis(100)).await.unwrap();
        let g2 = reg.clone().acquire_read(p, Duration::from_millis(100)).await.unwrap();
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let reg = PathLockRegistry::new();
        let p = Path::new("/tmp/b");
        let _w = reg.clone().acquire_write(p, Duration::from_millis(50)).await.unwrap();
        let r = reg.clone().acquire_read(p, Duration::from_millis(50)).await;
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn read_then_write_upgrade_is_illegal() {
        let reg = PathLockRegistry::new();
        let p = Path::new("/tmp/c");
        with_owner(async {
            let _r = reg.clone().acquire_read(p, Duration::from_millis(50)).await.unwrap();
            let w = reg.clone().acquire_write(p, Duration::from_millis(50)).await;
            assert!(w.unwrap_err().is_lock());
        })
        .await;
    }

    #[tokio::test]
    async fn release_is_idempotent_and_frees_the_entry() {
        let reg = PathLockRegistry::new();
        let p = Path::new("/tmp/d");
        let g = reg.clone().acquire_write(p, Duration::from_millis(50)).await.unwrap();
        g.release();
        // A fresh acquire should succeed immediately since the entry was
        // released (and removed, being empty) rather than left locked.
        let g2 = reg.clone().acquire_write(p, Duration::from_millis(50)).await;
        assert!(g2.is_ok());
    }
}
