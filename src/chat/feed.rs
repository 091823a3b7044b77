//! Live message feed for one room.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use futures_util::future::join_all;
use tracing::{debug, warn};

use super::{
    ChatContext, SubscriptionHandle, SubscriptionRegistry,
    read_state,
    subscriptions::Slot,
    view::{FeedTarget, Notice, RenderedMessage, ViewEvent},
};
use crate::{
    error::ChatResult,
    format,
    model::{DEFAULT_AVATAR, DEFAULT_NAME, Identity, Message, RoomRef, SignedInUser, TIMESTAMP},
    store::{Direction, DocumentStore, Query, Snapshot, StoreResult},
};

pub fn feed_query(room: &RoomRef) -> ChatResult<Query> {
    Ok(Query::collection(room.messages()?).order_by(TIMESTAMP, Direction::Ascending))
}

/// Replaces whatever feeds the target of `room` with a live query on `room`.
pub fn attach(ctx: &Arc<ChatContext>, registry: &mut SubscriptionRegistry, room: RoomRef) -> ChatResult<()> {
    let (slot, target) = match room {
        RoomRef::Group { .. } => (Slot::GroupFeed, FeedTarget::Group),
        RoomRef::Private { .. } => (Slot::PrivateFeed, FeedTarget::Private),
    };
    let query = feed_query(&room)?;

    registry.attach(slot, || {
        let generation = ctx.next_feed_generation(target);
        let listener = ctx.store.listen(query);
        let ctx = ctx.clone();
        SubscriptionHandle::spawn(listener, move |snapshot| {
            let ctx = ctx.clone();
            let room = room.clone();
            async move { on_snapshot(&ctx, &room, target, generation, snapshot).await }
        })
    });
    Ok(())
}

async fn on_snapshot(
    ctx: &ChatContext,
    room: &RoomRef,
    target: FeedTarget,
    generation: u64,
    snapshot: StoreResult<Snapshot>,
) {
    let snapshot = match snapshot {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(%err, ?target, "feed subscription interrupted");
            ctx.emit(ViewEvent::Notice { notice: Notice::reconnecting() });
            return;
        }
    };

    let messages = render_snapshot(ctx, &snapshot).await;
    if !ctx.is_current_feed(target, generation) {
        debug!(?target, "dropping snapshot of a replaced feed");
        return;
    }

    if messages.is_empty() {
        ctx.emit(ViewEvent::EmptyFeed { target });
    } else {
        ctx.emit(ViewEvent::Messages { target, messages });
        ctx.emit(ViewEvent::ScrollToNewest { target });
    }

    if let Some(partner_id) = room.partner() {
        if ctx.is_active_private(partner_id) {
            if let Err(err) = read_state::mark_read(ctx, partner_id).await {
                ctx.report(&err);
            }
        }
    }
}

/// Renders every message of `snapshot` in order, looking up each distinct
/// sender other than the signed-in identity once.
pub async fn render_snapshot(ctx: &ChatContext, snapshot: &Snapshot) -> Vec<RenderedMessage> {
    let messages: Vec<Message> = snapshot
        .docs
        .iter()
        .filter_map(|doc| match Message::from_document(doc) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(%err, path = %doc.path, "skipping malformed message");
                None
            }
        })
        .collect();

    let senders = resolve_senders(ctx.store.as_ref(), &ctx.me.id, &messages).await;
    messages.iter().map(|message| render_message(&ctx.me, &senders, message)).collect()
}

/// Current identity of each distinct sender in `messages` except `me`;
/// `None` when the identity is missing or could not be read.
pub async fn resolve_senders(
    store: &dyn DocumentStore,
    me: &str,
    messages: &[Message],
) -> HashMap<String, Option<Identity>> {
    let ids: BTreeSet<&str> = messages.iter().map(|m| m.sender_id.as_str()).filter(|id| *id != me).collect();

    let lookups = ids.into_iter().map(|id| async move {
        let identity = match Identity::path(id) {
            Ok(path) => match store.get(&path).await {
                Ok(Some(doc)) => Identity::from_document(&doc).ok(),
                Ok(None) => None,
                Err(err) => {
                    debug!(%err, sender = id, "sender lookup failed");
                    None
                }
            },
            Err(_) => None,
        };
        (id.to_owned(), identity)
    });
    join_all(lookups).await.into_iter().collect()
}

/// Name and avatar come from the snapshot embedded in the message, falling
/// back to the live identity; presence always comes from the live identity.
pub fn render_message(
    me: &SignedInUser,
    senders: &HashMap<String, Option<Identity>>,
    message: &Message,
) -> RenderedMessage {
    let html = format::format(&message.text);

    if message.sender_id == me.id {
        return RenderedMessage {
            id: message.id.clone(),
            sender_id: me.id.clone(),
            sender_name: "You".to_owned(),
            sender_avatar: me.avatar_url.clone().unwrap_or_else(|| DEFAULT_AVATAR.to_owned()),
            sender_online: Some(true),
            is_self: true,
            html,
            image_url: message.image_url.clone(),
            timestamp: message.timestamp,
        };
    }

    let live = senders.get(&message.sender_id).and_then(Option::as_ref);
    let sender_name = message
        .sender_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| live.map(|identity| identity.display_name.clone()).filter(|name| !name.is_empty()))
        .unwrap_or_else(|| DEFAULT_NAME.to_owned());
    let sender_avatar = message
        .sender_avatar
        .clone()
        .or_else(|| live.and_then(|identity| identity.avatar_url.clone()))
        .unwrap_or_else(|| DEFAULT_AVATAR.to_owned());

    RenderedMessage {
        id: message.id.clone(),
        sender_id: message.sender_id.clone(),
        sender_name,
        sender_avatar,
        sender_online: live.map(|identity| identity.online),
        is_self: false,
        html,
        image_url: message.image_url.clone(),
        timestamp: message.timestamp,
    }
}
