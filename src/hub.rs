//! # Event Hub
//!
//! In-process, channel-keyed pub/sub used to push realtime events to SSE
//! consumers and to anything else that subscribes. Fan-out is best-effort:
//! each subscriber owns a bounded FIFO, a full FIFO silently drops the
//! message for that subscriber, and publishers never block on consumers.
//!
//! Order is preserved per (channel, subscriber) while the subscriber keeps
//! up. There is no delivery guarantee and no cross-channel ordering.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

/// Capacity of each subscriber's FIFO.
pub const SUBSCRIBER_BUFFER: usize = 16;

/// One event as delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub channel: String,
    pub kind: String,
    pub data: Value,
}

/// A live subscription: the receiving end of one subscriber's FIFO.
///
/// The hub closes the FIFO exactly once when the subscription is removed;
/// after that, receives report disconnection.
pub struct Subscription {
    id: u64,
    rx: Receiver<EventMessage>,
}

impl Subscription {
    /// Block up to `timeout` for the next event. `Err` means either nothing
    /// arrived in time or the subscription was closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<EventMessage, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<EventMessage> {
        self.rx.try_recv().ok()
    }
}

/// Channel-keyed pub/sub registry.
///
/// The subscriber map sits behind a read/write lock: publishes take the
/// read side, so concurrent publishers on different (or the same) channels
/// never serialize on each other beyond the map lock.
#[derive(Default)]
pub struct EventHub {
    subscribers: RwLock<HashMap<String, HashMap<u64, SyncSender<EventMessage>>>>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber on `channel` with a fresh bounded FIFO.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let (tx, rx) = std::sync::mpsc::sync_channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut map = self.subscribers.write().unwrap();
        map.entry(channel.to_string()).or_default().insert(id, tx);

        Subscription { id, rx }
    }

    /// Remove a subscription. Dropping the hub's sender closes the FIFO;
    /// unsubscribing a subscription that is already gone is a no-op. An
    /// emptied channel is dropped from the registry.
    pub fn unsubscribe(&self, channel: &str, subscription: &Subscription) {
        let mut map = self.subscribers.write().unwrap();
        if let Some(subs) = map.get_mut(channel) {
            subs.remove(&subscription.id);
            if subs.is_empty() {
                map.remove(channel);
            }
        }
    }

    /// Encode `payload` and offer the message to every subscriber of
    /// `channel` without blocking; full FIFOs drop the message. A payload
    /// that cannot be encoded is logged and not delivered. Publishing to a
    /// channel with no subscribers is a no-op.
    pub fn publish<T: Serialize>(&self, channel: &str, kind: &str, payload: &T) {
        let data = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(channel, error = %e, "dropping unencodable event payload");
                return;
            }
        };

        let message = EventMessage {
            channel: channel.to_string(),
            kind: kind.to_string(),
            data,
        };

        let map = self.subscribers.read().unwrap();
        if let Some(subs) = map.get(channel) {
            for tx in subs.values() {
                match tx.try_send(message.clone()) {
                    Ok(()) => {}
                    // subscriber is slow or gone; drop rather than block
                    Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
                }
            }
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .read()
            .unwrap()
            .get(channel)
            .map_or(0, HashMap::len)
    }
}
