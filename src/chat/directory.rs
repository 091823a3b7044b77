//! Everyone else who has ever signed in, online first.

use std::{collections::BTreeSet, sync::Arc};

use tracing::warn;

use super::{
    ChatContext, SubscriptionHandle, SubscriptionRegistry,
    subscriptions::Slot,
    view::{DirectoryEntry, DirectoryList, Notice, ViewEvent},
};
use crate::{
    model::{DEFAULT_AVATAR, DEFAULT_NAME, IDENTITIES, Identity},
    store::{Query, Snapshot, StoreResult},
};

pub fn directory_query() -> Query {
    Query::collection(IDENTITIES)
}

/// Online first, then by name under Unicode lowercase folding, then by id so
/// equal names keep a stable order. Accents are compared by code point.
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| {
        b.online
            .cmp(&a.online)
            .then_with(|| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()))
            .then_with(|| a.display_name.cmp(&b.display_name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub fn attach(ctx: &Arc<ChatContext>, registry: &mut SubscriptionRegistry) {
    registry.attach(Slot::Directory, || {
        let listener = ctx.store.listen(directory_query());
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
            warn!(%err, "directory subscription interrupted");
            ctx.emit(ViewEvent::Notice { notice: Notice::reconnecting() });
        }
    }
}

/// Renders one sorted sequence into both lists, with current badge counts.
pub fn apply_snapshot(ctx: &ChatContext, snapshot: &Snapshot) {
    let identities: Vec<Identity> = snapshot
        .docs
        .iter()
        .filter_map(|doc| match Identity::from_document(doc) {
            Ok(identity) => Some(identity),
            Err(err) => {
                warn!(%err, path = %doc.path, "skipping malformed identity");
                None
            }
        })
        .filter(|identity| identity.id != ctx.me.id)
        .collect();

    let mut entries: Vec<DirectoryEntry> = {
        let badges = ctx.badges();
        identities
            .into_iter()
            .map(|identity| DirectoryEntry {
                unread: badges.get(&identity.id),
                display_name: if identity.display_name.is_empty() {
                    DEFAULT_NAME.to_owned()
                } else {
                    identity.display_name
                },
                avatar_url: identity.avatar_url.unwrap_or_else(|| DEFAULT_AVATAR.to_owned()),
                online: identity.online,
                last_seen: identity.last_seen,
                id: identity.id,
            })
            .collect()
    };
    sort_entries(&mut entries);

    let online_count = entries.iter().filter(|entry| entry.online).count();
    ctx.set_displayed_senders(entries.iter().map(|entry| entry.id.clone()).collect::<BTreeSet<_>>());

    ctx.emit(ViewEvent::Directory { list: DirectoryList::Primary, entries: entries.clone(), online_count });
    ctx.emit(ViewEvent::Directory { list: DirectoryList::Secondary, entries, online_count });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, name: &str, online: bool) -> DirectoryEntry {
        DirectoryEntry {
            id: id.into(),
            display_name: name.into(),
            avatar_url: DEFAULT_AVATAR.into(),
            online,
            last_seen: None,
            unread: 0,
        }
    }

    #[test]
    fn online_first_then_name_ignoring_case() {
        let mut entries = vec![
            entry("1", "zoe", true),
            entry("2", "Bob", false),
            entry("3", "alice", false),
            entry("4", "Yann", true),
            entry("5", "bob", false),
            entry("6", "émile", false),
            entry("7", "Émile", false),
        ];
        sort_entries(&mut entries);
        let ids: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["4", "1", "3", "2", "5", "7", "6"]);
    }
}
