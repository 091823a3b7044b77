use std::{collections::HashMap, future::Future};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::store::{Listener, Registration, Snapshot, StoreResult};

/// One live query and the task consuming its snapshots.
///
/// Cancelling detaches the query from the store and aborts the task without
/// waiting for a callback that is already running.
pub struct SubscriptionHandle {
    registration: Option<Registration>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn spawn<F, Fut>(listener: Listener, mut on_snapshot: F) -> Self
    where
        F: FnMut(StoreResult<Snapshot>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Listener { mut snapshots, registration } = listener;
        let task = tokio::spawn(async move {
            while let Some(snapshot) = snapshots.recv().await {
                on_snapshot(snapshot).await;
            }
        });
        Self { registration: Some(registration), task }
    }

    pub fn cancel(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.remove();
        }
        self.task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    GroupFeed,
    PrivateFeed,
    Unread,
    Directory,
    Responder,
}

/// At most one live subscription per [`Slot`].
#[derive(Default)]
pub struct SubscriptionRegistry {
    handles: HashMap<Slot, SubscriptionHandle>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the current occupant of `slot` before `subscribe` runs, so two
    /// subscriptions never feed the same target.
    pub fn attach(&mut self, slot: Slot, subscribe: impl FnOnce() -> SubscriptionHandle) {
        self.detach(slot);
        self.handles.insert(slot, subscribe());
        debug!(?slot, "subscription attached");
    }

    pub fn detach(&mut self, slot: Slot) -> bool {
        match self.handles.remove(&slot) {
            Some(handle) => {
                handle.cancel();
                debug!(?slot, "subscription detached");
                true
            }
            None => false,
        }
    }

    pub fn detach_all(&mut self) {
        for (slot, handle) in self.handles.drain() {
            handle.cancel();
            debug!(?slot, "subscription detached");
        }
    }

    pub fn is_attached(&self, slot: Slot) -> bool {
        self.handles.contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
