use tracing::info;

use super::ChatContext;
use crate::{
    error::ChatResult,
    model::{READ, READ_AT, RECEIVER_ID, RoomRef},
    store::{Batch, Fields, Query},
};

/// Unread messages `partner_id` sent to the signed-in identity.
pub fn inbound_unread(me: &str, partner_id: &str) -> ChatResult<Query> {
    let room = RoomRef::private_between(me, partner_id);
    Ok(Query::collection(room.messages()?).where_eq(RECEIVER_ID, me).where_eq(READ, false))
}

/// Marks everything `partner_id` sent us as read in one batch, then clears
/// their badge without waiting for the unread subscription to catch up.
///
/// Only ever writes `read = true`; with nothing unread it writes nothing.
pub async fn mark_read(ctx: &ChatContext, partner_id: &str) -> ChatResult<usize> {
    let unread = ctx.store.query(&inbound_unread(&ctx.me.id, partner_id)?).await?;
    if unread.is_empty() {
        return Ok(0);
    }

    let mut batch = Batch::new();
    for doc in &unread {
        batch.update(doc.path.clone(), Fields::new().value(READ, true).server_timestamp(READ_AT));
    }
    ctx.store.commit(batch).await?;
    info!(partner = partner_id, count = unread.len(), "messages marked read");

    ctx.set_badge_locally(partner_id, 0);
    Ok(unread.len())
}
