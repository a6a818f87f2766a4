// SPDX-License-Identifier: MIT

//! Process-wide notification broadcaster.
//!
//! Subscribers register a filter and receive committed transaction batches.
//! Delivery is lossy under back-pressure: when a subscriber's queue is
//! full the oldest batch is dropped and the subscription's `missed`
//! counter is bumped; the counter rides on every delivered batch so the
//! subscriber can detect the gap.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

use satchel_core::notification::{EntityKind, Notification, NotificationBatch, Operation};
use satchel_core::Id;

/// Default bound of a subscriber's outbound queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// What a subscriber wants to see. Empty filter means everything.
#[derive(Debug, Clone, Default)]
pub struct SubscriberFilter {
    /// Restrict to these entity kinds.
    pub kinds: Option<HashSet<EntityKind>>,
    /// Restrict to these operations.
    pub ops: Option<HashSet<Operation>>,
    /// Skip batches produced by this session (usually the subscriber's own).
    pub ignore_session: Option<String>,
    /// Restrict to changes belonging to this resource.
    pub resource: Option<String>,
    /// Restrict to changes in this collection.
    pub collection: Option<Id>,
    /// Restrict to items of this mime-type.
    pub mime_type: Option<String>,
}

impl SubscriberFilter {
    fn matches(&self, n: &Notification) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&n.kind()) {
                return false;
            }
        }
        if let Some(ops) = &self.ops {
            if !ops.contains(&n.operation()) {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if n.resource() != Some(resource.as_str()) {
                return false;
            }
        }
        if let Some(col) = self.collection {
            let in_collection = match n {
                Notification::Item { collection, .. } => *collection == col,
                Notification::Collection { id, .. } => *id == col,
                _ => false,
            };
            if !in_collection {
                return false;
            }
        }
        if let Some(mime) = &self.mime_type {
            let matches = match n {
                Notification::Item { item, .. } => &item.mime_type == mime,
                _ => false,
            };
            if !matches {
                return false;
            }
        }
        true
    }
}

struct QueueState {
    queue: VecDeque<NotificationBatch>,
    missed: u64,
}

struct SubscriberInner {
    filter: SubscriberFilter,
    depth: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Receiving end of a subscription.
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

impl Subscriber {
    /// Waits for the next batch. The batch's `missed` field carries the
    /// total number of batches lost to back-pressure so far.
    pub async fn recv(&self) -> NotificationBatch {
        loop {
            if let Some(batch) = self.try_recv() {
                return batch;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Pops the next batch without waiting.
    pub fn try_recv(&self) -> Option<NotificationBatch> {
        let mut state = self.inner.state.lock();
        let missed = state.missed;
        state.queue.pop_front().map(|mut batch| {
            batch.missed = missed;
            batch
        })
    }

    /// Total number of batches this subscription has lost so far.
    pub fn missed(&self) -> u64 {
        self.inner.state.lock().missed
    }
}

/// Cloneable handle to the process-wide bus.
#[derive(Clone, Default)]
pub struct NotificationBus {
    subscribers: Arc<Mutex<Vec<Weak<SubscriberInner>>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, filter: SubscriberFilter) -> Subscriber {
        self.subscribe_with_depth(filter, DEFAULT_QUEUE_DEPTH)
    }

    pub fn subscribe_with_depth(&self, filter: SubscriberFilter, depth: usize) -> Subscriber {
        let inner = Arc::new(SubscriberInner {
            filter,
            depth: depth.max(1),
            state: Mutex::new(QueueState { queue: VecDeque::new(), missed: 0 }),
            notify: Notify::new(),
        });
        self.subscribers.lock().push(Arc::downgrade(&inner));
        Subscriber { inner }
    }

    /// Broadcasts one committed transaction's batch.
    pub fn emit(&self, batch: NotificationBatch) {
        // Copy the live subscriber list under the lock, deliver outside it.
        let subs: Vec<Arc<SubscriberInner>> = {
            let mut list = self.subscribers.lock();
            list.retain(|weak| weak.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };

        for sub in subs {
            if sub.filter.ignore_session.as_deref() == Some(batch.session_id.as_str()) {
                continue;
            }
            let notifications: Vec<Notification> = batch
                .notifications
                .iter()
                .filter(|n| sub.filter.matches(n))
                .cloned()
                .collect();
            if notifications.is_empty() {
                continue;
            }
            let filtered = NotificationBatch {
                session_id: batch.session_id.clone(),
                notifications,
                missed: 0,
            };
            {
                let mut state = sub.state.lock();
                if state.queue.len() >= sub.depth {
                    state.queue.pop_front();
                    state.missed += 1;
                }
                state.queue.push_back(filtered);
            }
            sub.notify.notify_one();
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
