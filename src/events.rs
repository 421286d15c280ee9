//! The optional observer: an injectable trait object rather than a fixed
//! callback list, covering four lifecycle hooks (start, stop, head
//! received, response sent).

use std::time::Duration;

use crate::head::RequestHead;
use crate::response::Response;

/// Timing/size statistics attached to a head-received or response-sent
/// event.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub bytes: u64,
    pub duration: Duration,
}

/// Observer hooks emitted by the lifecycle controller and the exchange
/// driver. Every method has a no-op default, so implementors only
/// override what they need.
pub trait Observer: Send + Sync {
    fn on_started(&self, _local_addr: &str) {}
    fn on_stopped(&self) {}
    fn on_head_received(&self, _head: &RequestHead, _stats: Stats) {}
    fn on_response_sent(&self, _response: &Response, _stats: Stats) {}
}

/// The default observer: every hook is a no-op.
pub struct NoopObserver;

impl Observer for NoopObserver {}
