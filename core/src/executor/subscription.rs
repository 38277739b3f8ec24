//! Observer registry for task-collection changes.
//!
//! Snapshots are queued in mutation order (the manager pushes them while it
//! still holds its state lock) and drained by whichever thread gets there
//! first. Listeners run with no manager lock held, so they may read the
//! manager or even mutate it; a mutation from inside a listener is queued and
//! delivered after the current one. A listener that panics is logged and
//! skipped; it stays registered and delivery to the others continues.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::state::Task;

use super::manager::lock;

type Listener = Box<dyn Fn(&[Task]) + Send + Sync>;

struct ListenerEntry {
    id: u64,
    active: AtomicBool,
    callback: Listener,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Arc<[Task]>>,
    delivering: bool,
}

#[derive(Default)]
pub(crate) struct SubscriptionBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Arc<ListenerEntry>>>,
    outbox: Mutex<Outbox>,
}

impl SubscriptionBus {
    pub(crate) fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&[Task]) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push(Arc::new(ListenerEntry {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        }));
        tracing::debug!("listener {} subscribed", id);
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = lock(&self.listeners);
        let Some(pos) = listeners.iter().position(|l| l.id == id) else {
            return false;
        };
        let entry = listeners.remove(pos);
        entry.active.store(false, Ordering::Release);
        tracing::debug!("listener {} unsubscribed", id);
        true
    }

    pub(crate) fn has_listeners(&self) -> bool {
        !lock(&self.listeners).is_empty()
    }

    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Queue a snapshot. Call while the producer's state lock is held.
    pub(crate) fn enqueue(&self, snapshot: Vec<Task>) {
        lock(&self.outbox).queue.push_back(snapshot.into());
    }

    /// Deliver queued snapshots unless another thread is already delivering.
    pub(crate) fn flush(&self) {
        {
            let mut outbox = lock(&self.outbox);
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }

        loop {
            let next = {
                let mut outbox = lock(&self.outbox);
                match outbox.queue.pop_front() {
                    Some(snapshot) => snapshot,
                    None => {
                        outbox.delivering = false;
                        return;
                    }
                }
            };

            let listeners: Vec<Arc<ListenerEntry>> = lock(&self.listeners).clone();
            for listener in listeners {
                if !listener.active.load(Ordering::Acquire) {
                    continue;
                }
                let delivered = catch_unwind(AssertUnwindSafe(|| (listener.callback)(&next)));
                if let Err(payload) = delivered {
                    tracing::error!(
                        "listener {} panicked: {}",
                        listener.id,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by `TaskManager::subscribe`.
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to stop it"]
pub struct Subscription {
    id: u64,
    bus: Weak<SubscriptionBus>,
}

impl Subscription {
    /// Stop further notifications. Idempotent.
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .map(|bus| bus.unsubscribe(self.id))
            .unwrap_or(false)
    }

    pub fn is_active(&self) -> bool {
        self.bus
            .upgrade()
            .map(|bus| lock(&bus.listeners).iter().any(|l| l.id == self.id))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
