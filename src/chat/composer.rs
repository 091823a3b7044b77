//! Sending messages.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{
    ChatContext,
    view::{FeedTarget, View, ViewEvent},
};
use crate::{
    error::{ChatError, ChatResult},
    model::{MESSAGES, PROCESSED, READ, READ_AT, RECEIVER_ID, RoomRef, SENDER_ID, TIMESTAMP},
    store::{DocPath, Fields},
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatTarget {
    Group,
    Private { partner_id: String },
}

impl ChatTarget {
    pub fn feed(&self) -> FeedTarget {
        match self {
            ChatTarget::Group => FeedTarget::Group,
            ChatTarget::Private { .. } => FeedTarget::Private,
        }
    }
}

/// Keeps the composer of one target disabled while alive.
pub(crate) struct ComposerLock<'a> {
    view: &'a dyn View,
    target: FeedTarget,
}

impl<'a> ComposerLock<'a> {
    pub(crate) fn engage(view: &'a dyn View, target: FeedTarget) -> Self {
        view.emit(ViewEvent::Composer { target, enabled: false });
        Self { view, target }
    }
}

impl Drop for ComposerLock<'_> {
    fn drop(&mut self) {
        self.view.emit(ViewEvent::Composer { target: self.target, enabled: true });
    }
}

pub fn validate_partner(me: &str, partner_id: &str) -> ChatResult<()> {
    if partner_id.trim().is_empty() || partner_id.contains('/') {
        return Err(ChatError::InvalidTarget(format!("{partner_id:?} is not an identity")));
    }
    if partner_id == me {
        return Err(ChatError::InvalidTarget("cannot open a private chat with yourself".to_owned()));
    }
    Ok(())
}

pub fn resolve_room(ctx: &ChatContext, target: &ChatTarget) -> ChatResult<RoomRef> {
    match target {
        ChatTarget::Group => Ok(RoomRef::group(&ctx.config.group_room_id)),
        ChatTarget::Private { partner_id } => {
            validate_partner(&ctx.me.id, partner_id)?;
            Ok(RoomRef::private_between(&ctx.me.id, partner_id))
        }
    }
}

/// A validated message ready to be written.
pub(crate) struct Outgoing {
    path: DocPath,
    fields: Fields,
}

impl Outgoing {
    pub(crate) async fn write(self, ctx: &ChatContext) -> ChatResult<()> {
        ctx.store.create(self.path.clone(), self.fields).await?;
        debug!(path = %self.path, "message sent");
        Ok(())
    }
}

/// Builds one message for `target`'s room with the sender's current name and
/// avatar embedded. Empty text is only allowed alongside an image.
pub(crate) fn compose(ctx: &ChatContext, target: &ChatTarget, text: &str, image_url: Option<String>) -> ChatResult<Outgoing> {
    let text = text.trim();
    if text.is_empty() && image_url.is_none() {
        return Err(ChatError::EmptyMessage);
    }
    let room = resolve_room(ctx, target)?;
    let path = room.room_path()?.child(MESSAGES, &Uuid::now_v7().to_string())?;

    let mut fields = Fields::new()
        .value("text", text)
        .value(SENDER_ID, ctx.me.id.as_str())
        .value("senderName", ctx.me.display_name.as_str())
        .value("senderAvatar", ctx.me.avatar_url.clone())
        .server_timestamp(TIMESTAMP);
    if let Some(image_url) = image_url {
        fields = fields.value("imageUrl", image_url);
    }
    if let Some(partner_id) = room.partner() {
        fields = fields.value(RECEIVER_ID, partner_id).value(READ, false).value(READ_AT, Value::Null);
        if ctx.config.assistant_id.as_deref() == Some(partner_id) {
            fields = fields.value(PROCESSED, false);
        }
    }
    Ok(Outgoing { path, fields })
}

/// Validates and writes one message, with the composer disabled during the write.
pub async fn send(ctx: &ChatContext, target: &ChatTarget, text: &str, image_url: Option<String>) -> ChatResult<()> {
    let message = compose(ctx, target, text, image_url)?;
    let _lock = ComposerLock::engage(ctx.view.as_ref(), target.feed());
    message.write(ctx).await
}
