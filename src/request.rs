//! The request value exposed to handlers and actions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::body::SharedBody;
use crate::channel::ChannelSender;
use crate::error::Error;
use crate::head::RequestHead;

/// Attributes shared across every receiver of one exchange (route
/// handler, before-actions, after-actions).
#[derive(Clone, Default)]
pub struct Attributes(Arc<Mutex<HashMap<String, Arc<dyn std::any::Any + Send + Sync>>>>);

impl Attributes {
    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.0.lock().unwrap().insert(key.into(), Arc::new(value));
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.0
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }
}

/// Single-consumption guard over the body handle: at most one receiver
/// may *subscribe* to the body per exchange. The stream itself
/// (`SharedBody`) stays reachable afterward — the exchange driver keeps
/// its own clone from construction so it can drain whatever the
/// subscriber left unread.
pub enum BodyHandle {
    Available(SharedBody),
    Taken,
}

impl BodyHandle {
    /// Takes the body stream for exclusive consumption. Returns `None` if
    /// it has already been taken once this exchange.
    pub fn take(&mut self) -> Option<SharedBody> {
        match std::mem::replace(self, BodyHandle::Taken) {
            BodyHandle::Available(b) => Some(b),
            BodyHandle::Taken => None,
        }
    }
}

/// A request view handed to one receiver (route handler, before-action,
/// or after-action). Each receiver gets a *distinct* `Request` whose
/// `params` are keyed by that receiver's own pattern; `head`,
/// `attributes`, and `body` are shared across all receivers of the
/// exchange. Only the route handler's view carries `interim` (a channel
/// handle); before/after actions never get one, so they cannot call
/// `write` directly.
pub struct Request {
    pub head: RequestHead,
    pub params: Vec<(String, String)>,
    pub attributes: Attributes,
    pub body: Arc<Mutex<BodyHandle>>,
    pub interim: Option<Arc<dyn ChannelSender>>,
    max_body_buffer: u64,
}

impl Request {
    pub fn new(head: RequestHead, body: Arc<Mutex<BodyHandle>>, max_body_buffer: u64) -> Request {
        Request {
            head,
            params: Vec::new(),
            attributes: Attributes::default(),
            body,
            interim: None,
            max_body_buffer,
        }
    }

    /// Returns a copy of this request with a different `params` map,
    /// keyed by `params` (the receiving pattern's bindings), sharing the
    /// same head, attributes, and body handle. `interim` is not carried
    /// over: only the exchange driver attaches one, to the handler's view.
    pub fn with_params(&self, params: Vec<(String, String)>) -> Request {
        Request {
            head: self.head.clone(),
            params,
            attributes: self.attributes.clone(),
            body: self.body.clone(),
            interim: None,
            max_body_buffer: self.max_body_buffer,
        }
    }

    /// Attaches a channel handle to this view. Only the exchange driver
    /// calls this, and only for the route handler's own view.
    pub fn with_interim(mut self, sender: Arc<dyn ChannelSender>) -> Request {
        self.interim = Some(sender);
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Takes exclusive ownership of the request body stream. Returns
    /// `None` if another receiver already subscribed this exchange.
    pub fn take_body(&self) -> Option<SharedBody> {
        self.body.lock().unwrap().take()
    }

    /// Materializes the whole request body into one buffer, capped by the
    /// server's `max_request_body_buffer_size`. Unlike lazy chunk
    /// iteration (`take_body`), this is a buffered conversion: exceeding
    /// the cap — known up front or only discovered while accumulating —
    /// fails with a `MaxBody` error rather than streaming indefinitely.
    pub async fn bytes(&self) -> Result<Bytes, Error> {
        let mut body = self
            .take_body()
            .ok_or_else(|| Error::new_illegal_state("request body already consumed"))?;
        crate::body::collect(&mut body, self.max_body_buffer).await
    }

    /// Like [`Request::bytes`], decoded as UTF-8 text. A body that isn't
    /// valid UTF-8 fails with `MediaTypeUnsupported` rather than lossily
    /// substituting replacement characters.
    pub async fn text(&self) -> Result<String, Error> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::new_media_type_unsupported())
    }
}
