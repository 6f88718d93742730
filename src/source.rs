// Push subscription seam plus the in-process hub that HTTP ingest publishes into.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::normalizer::RawEvent;

/// Contexts whose last event is kept for replay; the oldest is forgotten first.
pub const DEFAULT_REPLAY_CAPACITY: usize = 64;

/// Names a device/session whose pushes the engine follows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("context id must be non-empty")]
pub struct EmptyContextId;

impl FromStr for ContextId {
    type Err = EmptyContextId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EmptyContextId);
        }
        Ok(ContextId(s.to_string()))
    }
}

/// One push, tagged with the subscription generation it was delivered under.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub generation: u64,
    pub event: RawEvent,
}

/// Sending half handed to a source on subscribe. Cloned per subscriber.
#[derive(Debug, Clone)]
pub struct DeliveryTx {
    generation: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl DeliveryTx {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self { generation, tx }
    }

    /// False when the engine side is gone.
    pub fn deliver(&self, event: RawEvent) -> bool {
        self.tx
            .send(Delivery {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Active subscription. Unsubscribes on `unsubscribe()` or drop, whichever comes first.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub trait PushSource: Send + Sync {
    /// Starts delivering events for `context` to `tx`. The source may deliver its last
    /// known value for the context immediately.
    fn subscribe(&self, context: &ContextId, tx: DeliveryTx) -> Subscription;
}

struct HubInner {
    next_id: u64,
    subscribers: HashMap<ContextId, Vec<(u64, DeliveryTx)>>,
    last_event: HashMap<ContextId, RawEvent>,
    replay_order: VecDeque<ContextId>,
    replay_capacity: usize,
}

impl HubInner {
    fn remember(&mut self, context: &ContextId, event: RawEvent) {
        if self.last_event.insert(context.clone(), event).is_some() {
            return;
        }
        self.replay_order.push_back(context.clone());
        while self.replay_order.len() > self.replay_capacity {
            if let Some(oldest) = self.replay_order.pop_front() {
                self.last_event.remove(&oldest);
            }
        }
    }
}

/// Fan-out of published events to per-context subscribers. New subscribers get the
/// context's last event replayed first, the way realtime databases echo cached state.
/// Replay state is kept for at most `replay_capacity` contexts.
#[derive(Clone)]
pub struct HubSource {
    inner: Arc<Mutex<HubInner>>,
}

impl Default for HubSource {
    fn default() -> Self {
        Self::with_replay_capacity(DEFAULT_REPLAY_CAPACITY)
    }
}

impl HubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replay_capacity(replay_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                next_id: 0,
                subscribers: HashMap::new(),
                last_event: HashMap::new(),
                replay_order: VecDeque::new(),
                replay_capacity,
            })),
        }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, context: &ContextId, event: RawEvent) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.remember(context, event.clone());
        let Some(subs) = inner.subscribers.get_mut(context) else {
            return 0;
        };
        subs.retain(|(_, tx)| !tx.is_closed());
        subs.iter()
            .filter(|(_, tx)| tx.deliver(event.clone()))
            .count()
    }

    pub fn subscriber_count(&self, context: &ContextId) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.subscribers.get(context).map_or(0, Vec::len)
    }

    /// Number of contexts with a cached event awaiting replay.
    pub fn replay_len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.last_event.len()
    }
}

impl PushSource for HubSource {
    fn subscribe(&self, context: &ContextId, tx: DeliveryTx) -> Subscription {
        let id = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = inner.next_id;
            inner.next_id += 1;
            if let Some(last) = inner.last_event.get(context).cloned() {
                tx.deliver(last);
            }
            inner
                .subscribers
                .entry(context.clone())
                .or_default()
                .push((id, tx));
            id
        };

        let inner = Arc::clone(&self.inner);
        let context = context.clone();
        Subscription::new(move || {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(subs) = inner.subscribers.get_mut(&context) {
                subs.retain(|(sub_id, _)| *sub_id != id);
                if subs.is_empty() {
                    inner.subscribers.remove(&context);
                }
            }
        })
    }
}
