// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session event fan-out (the event router).
//!
//! One [`SessionHub`] per session, many subscribers (WebSocket connections).
//! Delivery is best-effort over bounded queues: a subscriber that cannot
//! drain its queue is dropped so producers never block, and its receiver
//! closing is the `slow_consumer` disconnect signal for the socket task.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use vibe80_core::{MessageId, SessionEvent, SessionId, WorktreeId};
use vibe80_storage::{Storage, StorageError};

/// Default per-subscriber queue bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<SessionEvent>,
}

/// Publish/subscribe hub for one session.
pub struct SessionHub {
    session_id: SessionId,
    queue_capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: Mutex<u64>,
}

/// A subscription: drain `rx` until it closes. Closure without an explicit
/// unsubscribe means the hub dropped this subscriber as a slow consumer.
pub struct SubscriberHandle {
    pub id: u64,
    pub rx: mpsc::Receiver<SessionEvent>,
}

impl SessionHub {
    pub fn new(session_id: SessionId, queue_capacity: usize) -> Self {
        Self {
            session_id,
            queue_capacity,
            subscribers: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Attach a subscriber with a fresh bounded queue.
    pub fn subscribe(&self) -> SubscriberHandle {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.subscribers.lock().push(Subscriber { id, tx });
        SubscriberHandle { id, rx }
    }

    /// Detach a subscriber (normal socket close).
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Fan an event out to every subscriber. Full queues drop their
    /// subscriber rather than blocking; the dropped sender closes the
    /// receiver, which the socket task reports as `slow_consumer`.
    pub fn publish(&self, event: &SessionEvent) {
        let mut dropped: Vec<u64> = Vec::new();
        {
            let subscribers = self.subscribers.lock();
            for subscriber in subscribers.iter() {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => dropped.push(subscriber.id),
                    Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(subscriber.id),
                }
            }
        }
        if !dropped.is_empty() {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|s| !dropped.contains(&s.id));
            tracing::warn!(
                session_id = %self.session_id,
                dropped = dropped.len(),
                "disconnected slow consumers"
            );
        }
    }

    /// Backfill for `worktree_messages_sync`: every persisted message after
    /// the cursor, in order, as `worktree_message` events. The caller sends
    /// these to the socket before draining the live queue, so a subscriber
    /// sees history strictly before anything that happened after it attached.
    pub async fn backfill(
        &self,
        storage: &dyn Storage,
        worktree_id: &WorktreeId,
        last_seen: Option<&MessageId>,
    ) -> Result<Vec<SessionEvent>, StorageError> {
        let messages = storage.list_messages(&self.session_id, worktree_id, last_seen).await?;
        Ok(messages
            .into_iter()
            .map(|message| SessionEvent::WorktreeMessage { message })
            .collect())
    }
}

/// Registry of hubs, one per session with at least one past subscriber or
/// publisher. Initialised at boot and threaded through the services.
#[derive(Default)]
pub struct RouterSet {
    queue_capacity: usize,
    hubs: Mutex<HashMap<SessionId, Arc<SessionHub>>>,
}

impl RouterSet {
    pub fn new(queue_capacity: usize) -> Self {
        Self { queue_capacity, hubs: Mutex::new(HashMap::new()) }
    }

    /// Hub for a session, created on first touch.
    pub fn hub(&self, session_id: SessionId) -> Arc<SessionHub> {
        let mut hubs = self.hubs.lock();
        Arc::clone(hubs.entry(session_id).or_insert_with(|| {
            let capacity =
                if self.queue_capacity == 0 { DEFAULT_QUEUE_CAPACITY } else { self.queue_capacity };
            Arc::new(SessionHub::new(session_id, capacity))
        }))
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
