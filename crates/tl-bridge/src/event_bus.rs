use std::sync::{Arc, Mutex};

use crate::protocol::InboundEvent;

struct Subscriber {
    channel: Option<String>,
    tx: flume::Sender<InboundEvent>,
}

impl Subscriber {
    fn wants(&self, event: &InboundEvent) -> bool {
        self.channel.as_deref().is_none_or(|c| c == event.channel)
    }
}

/// A broadcast-style bus for inbound events built on top of flume channels.
///
/// Subscribers either receive every event ([`subscribe`](Self::subscribe)) or
/// only those of one channel ([`subscribe_channel`](Self::subscribe_channel)),
/// which is how a task view listens to its own task. The bus can be cloned
/// cheaply (it wraps its internals in an `Arc`).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    /// Create a new, empty event bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a subscriber for every channel.
    pub fn subscribe(&self) -> flume::Receiver<InboundEvent> {
        self.register(None)
    }

    /// Register a subscriber that only sees events published on `channel`.
    pub fn subscribe_channel(&self, channel: impl Into<String>) -> flume::Receiver<InboundEvent> {
        self.register(Some(channel.into()))
    }

    fn register(&self, channel: Option<String>) -> flume::Receiver<InboundEvent> {
        let (tx, rx) = flume::unbounded();
        let mut subs = self.inner.lock().expect("EventBus lock poisoned");
        subs.push(Subscriber { channel, tx });
        rx
    }

    /// Publish an event to every matching subscriber and return how many
    /// received it.
    ///
    /// Disconnected subscribers (whose receivers have been dropped) are
    /// pruned, whether or not the event was meant for them.
    pub fn publish(&self, event: InboundEvent) -> usize {
        let mut subs = self.inner.lock().expect("EventBus lock poisoned");
        let mut delivered = 0;
        subs.retain(|sub| {
            if !sub.wants(&event) {
                return !sub.tx.is_disconnected();
            }
            let ok = sub.tx.send(event.clone()).is_ok();
            if ok {
                delivered += 1;
            }
            ok
        });
        tracing::trace!(channel = %event.channel, delivered, "event published");
        delivered
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        let subs = self.inner.lock().expect("EventBus lock poisoned");
        subs.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
