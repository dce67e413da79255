//! Fan-out of server events to connected clients.
//!
//! Each subscriber owns a bounded SPSC outbox. The game thread is the only
//! producer and the subscriber's session thread the only consumer. Events are
//! serialized once and the same `Arc<str>` is pushed to every outbox.
//!
//! A full outbox means the client is not keeping up. It is evicted rather than
//! allowed to stall the table: dropping the producer is observed by the
//! session thread, which closes the socket.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::protocol::{ServerMessage, encode};
use crate::sync::spsc;
use crate::trace::{error, warn};

/// Messages buffered per subscriber before it counts as too slow.
pub const OUTBOX_CAPACITY: usize = 256;

/// Game-thread end of a subscriber's outbox.
pub type Outbox = spsc::Producer<Arc<str>, OUTBOX_CAPACITY>;

/// Session-thread end of a subscriber's outbox.
pub type OutboxReader = spsc::Consumer<Arc<str>, OUTBOX_CAPACITY>;

/// Creates an outbox pair for a new subscriber.
#[must_use]
pub fn outbox() -> (Outbox, OutboxReader) {
    spsc::channel()
}

/// Identifies one WebSocket connection for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Connected subscribers, owned by the game thread.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: HashMap<SubscriberId, Outbox>,
    evicted: u64,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Replaces any outbox already held under `id`.
    pub fn insert(&mut self, id: SubscriberId, outbox: Outbox) {
        self.subscribers.insert(id, outbox);
    }

    /// Unregisters a subscriber. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Subscribers dropped for overflowing their outbox since startup.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Sends `message` to one subscriber. Returns `false` if it is unknown or
    /// was evicted by this send.
    pub fn send_to(&mut self, id: SubscriberId, message: &ServerMessage) -> bool {
        let Some(frame) = encode_or_log(message) else {
            return false;
        };
        let Some(outbox) = self.subscribers.get(&id) else {
            return false;
        };
        if outbox.push(frame).is_ok() {
            return true;
        }
        self.evict(id);
        false
    }

    /// Sends `message` to every subscriber and returns how many received it.
    pub fn broadcast(&mut self, message: &ServerMessage) -> usize {
        match encode_or_log(message) {
            Some(frame) => self.broadcast_frame(&frame),
            None => 0,
        }
    }

    /// Pushes an already encoded frame to every subscriber.
    pub fn broadcast_frame(&mut self, frame: &Arc<str>) -> usize {
        let mut stale = Vec::new();
        let mut delivered = 0;
        for (&id, outbox) in &self.subscribers {
            if outbox.is_disconnected() {
                stale.push((id, false));
            } else if outbox.push(Arc::clone(frame)).is_ok() {
                delivered += 1;
            } else {
                stale.push((id, true));
            }
        }
        for (id, overflowed) in stale {
            if overflowed {
                self.evict(id);
            } else {
                self.subscribers.remove(&id);
            }
        }
        delivered
    }

    fn evict(&mut self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            self.evicted += 1;
            warn!(subscriber = %id, capacity = OUTBOX_CAPACITY, "outbox full, evicting slow subscriber");
        }
    }
}

fn encode_or_log(message: &ServerMessage) -> Option<Arc<str>> {
    match encode(message) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(error = %e, "dropping unencodable event");
            None
        }
    }
}
