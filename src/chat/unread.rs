//! Unread badges and the window title.
//!
//! One collection-group query over every room's messages addressed to the
//! signed-in identity and still unread decides all badge counts and the
//! total shown in the title.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use tracing::{debug, warn};

use super::{
    ChatContext, SubscriptionHandle, SubscriptionRegistry,
    subscriptions::Slot,
    view::{Notice, ViewEvent},
};
use crate::{
    model::{MESSAGES, READ, RECEIVER_ID, SENDER_ID},
    store::{Document, Query, Snapshot, StoreResult},
};

/// Badge counts as currently rendered, keyed by sender.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BadgeBoard {
    counts: HashMap<String, u32>,
}

impl BadgeBoard {
    pub fn get(&self, sender_id: &str) -> u32 {
        self.counts.get(sender_id).copied().unwrap_or(0)
    }

    /// Returns whether the rendered count changed.
    pub fn set(&mut self, sender_id: &str, count: u32) -> bool {
        let previous = self.counts.insert(sender_id.to_owned(), count).unwrap_or(0);
        previous != count
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn senders(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }
}

pub fn title_for(app_name: &str, total: u32) -> String {
    if total > 0 { format!("({total}) {app_name}") } else { app_name.to_owned() }
}

pub fn unread_query(me: &str) -> Query {
    Query::collection_group(MESSAGES).where_eq(RECEIVER_ID, me).where_eq(READ, false)
}

pub fn count_by_sender(docs: &[Document]) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for doc in docs {
        if let Some(sender) = doc.get(SENDER_ID).and_then(|v| v.as_str()) {
            *counts.entry(sender.to_owned()).or_insert(0) += 1;
        }
    }
    counts
}

pub fn attach(ctx: &Arc<ChatContext>, registry: &mut SubscriptionRegistry) {
    registry.attach(Slot::Unread, || {
        let listener = ctx.store.listen(unread_query(&ctx.me.id));
        let ctx = ctx.clone();
        SubscriptionHandle::spawn(listener, move |snapshot| {
            let ctx = ctx.clone();
            async move { on_snapshot(&ctx, snapshot) }
        })
    });
}

fn on_snapshot(ctx: &ChatContext, snapshot: StoreResult<Snapshot>) {
    match snapshot {
        Ok(snapshot) => apply_snapshot(ctx, &snapshot),
        Err(err) => {
            warn!(%err, "unread subscription interrupted");
            ctx.emit(ViewEvent::Notice { notice: Notice::reconnecting() });
        }
    }
}

/// Pushes a badge for every sender with unread messages, clears the badges
/// of displayed senders that have none left, and republishes the title.
pub fn apply_snapshot(ctx: &ChatContext, snapshot: &Snapshot) {
    let counts = count_by_sender(&snapshot.docs);
    let total: u32 = counts.values().sum();

    let mut events = Vec::new();
    {
        let mut badges = ctx.badges();
        for (sender_id, count) in &counts {
            badges.set(sender_id, *count);
            events.push(ViewEvent::Badge { sender_id: sender_id.clone(), count: *count });
        }

        let mut displayed = ctx.displayed_senders();
        displayed.extend(badges.senders().map(str::to_owned));
        let cleared: BTreeSet<String> = displayed
            .into_iter()
            .filter(|sender_id| !counts.contains_key(sender_id) && badges.get(sender_id) != 0)
            .collect();
        for sender_id in cleared {
            badges.set(&sender_id, 0);
            events.push(ViewEvent::Badge { sender_id, count: 0 });
        }
    }
    debug!(senders = counts.len(), total, "unread counts updated");

    for event in events {
        ctx.emit(event);
    }
    ctx.emit(ViewEvent::Title { title: title_for(&ctx.config.app_name, total) });
}
