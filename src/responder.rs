//! Scripted assistant answering commands sent to it in private.
//!
//! It reads the signed-in identity's unprocessed messages in the assistant
//! room and answers each with an ordinary private message, so the engine
//! treats its replies like anyone else's.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    chat::{ChatContext, Slot, SubscriptionHandle, SubscriptionRegistry},
    error::ChatResult,
    model::{
        Identity, MESSAGES, Message, PROCESSED, READ, READ_AT, RECEIVER_ID, RoomRef, SENDER_ID, SignedInUser,
        TIMESTAMP,
    },
    store::{Batch, Direction, Document, DocumentStore, Fields, Query, StoreError},
};

pub const ASSISTANT_NAME: &str = "Assistant";

const MAX_DICE: u32 = 20;
const MAX_SIDES: u32 = 1000;

pub async fn ensure_assistant(store: &dyn DocumentStore, assistant_id: &str) -> ChatResult<()> {
    let fields = Fields::new()
        .value("id", assistant_id)
        .value("displayName", ASSISTANT_NAME)
        .value("online", true);
    store.set(Identity::path(assistant_id)?, fields, true).await?;
    Ok(())
}

pub fn pending_commands(me: &str, assistant_id: &str) -> ChatResult<Query> {
    let room = RoomRef::private_between(me, assistant_id);
    Ok(Query::collection(room.messages()?)
        .where_eq(SENDER_ID, me)
        .where_eq(PROCESSED, false)
        .order_by(TIMESTAMP, Direction::Ascending))
}

pub fn attach(ctx: &Arc<ChatContext>, registry: &mut SubscriptionRegistry, assistant_id: &str) -> ChatResult<()> {
    let query = pending_commands(&ctx.me.id, assistant_id)?;
    let assistant_id = assistant_id.to_owned();

    registry.attach(Slot::Responder, || {
        let listener = ctx.store.listen(query);
        let ctx = ctx.clone();
        SubscriptionHandle::spawn(listener, move |snapshot| {
            let ctx = ctx.clone();
            let assistant_id = assistant_id.clone();
            async move {
                let snapshot = match snapshot {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        debug!(%err, "responder subscription interrupted");
                        return;
                    }
                };
                for doc in &snapshot.docs {
                    if let Err(err) = respond(ctx.store.as_ref(), &ctx.me, &assistant_id, doc).await {
                        warn!(%err, path = %doc.path, "assistant failed to answer");
                    }
                }
            }
        })
    });
    Ok(())
}

/// Marks `doc` processed and writes the reply in the same batch. A message
/// someone else already handled is skipped.
pub async fn respond(
    store: &dyn DocumentStore,
    me: &SignedInUser,
    assistant_id: &str,
    doc: &Document,
) -> ChatResult<()> {
    let message = Message::from_document(doc)?;
    let reply = reply_to(&message.text, me, &mut rand::rng());

    let room = RoomRef::private_between(&me.id, assistant_id);
    let reply_path = room.room_path()?.child(MESSAGES, &Uuid::now_v7().to_string())?;

    let mut batch = Batch::new();
    batch
        .update_if_unchanged(doc.path.clone(), Fields::new().value(PROCESSED, true), doc.update_time)
        .create(
            reply_path,
            Fields::new()
                .value("text", reply)
                .value(SENDER_ID, assistant_id)
                .value("senderName", ASSISTANT_NAME)
                .value(RECEIVER_ID, me.id.as_str())
                .value(READ, false)
                .value(READ_AT, serde_json::Value::Null)
                .server_timestamp(TIMESTAMP),
        );

    match store.commit(batch).await {
        Ok(()) => Ok(()),
        Err(StoreError::Conflict(_)) => {
            debug!(path = %doc.path, "command already answered");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub fn reply_to(text: &str, me: &SignedInUser, rng: &mut impl Rng) -> String {
    let text = text.trim();
    let (command, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let args = args.trim();

    match command {
        "/help" => "Commands: /help, /time, /roll [NdM], /echo <text>, /whoami".to_owned(),
        "/time" => {
            let now = time::OffsetDateTime::now_utc();
            format!("It is {:02}:{:02} UTC on {}.", now.hour(), now.minute(), now.date())
        }
        "/roll" => roll(args, rng),
        "/echo" if args.is_empty() => "Nothing to echo.".to_owned(),
        "/echo" => args.to_owned(),
        "/whoami" => format!("You are {} ({}).", me.display_name, me.id),
        _ if command.starts_with('/') => format!("Unknown command {command}. Try /help."),
        _ => "I only understand commands. Try /help.".to_owned(),
    }
}

fn roll(spec: &str, rng: &mut impl Rng) -> String {
    let spec = if spec.is_empty() { "1d6" } else { spec };
    let parsed = spec
        .split_once(['d', 'D'])
        .and_then(|(count, sides)| {
            let count = if count.is_empty() { Some(1) } else { count.parse::<u32>().ok() };
            Some((count?, sides.parse::<u32>().ok()?))
        })
        .filter(|&(count, sides)| (1..=MAX_DICE).contains(&count) && (2..=MAX_SIDES).contains(&sides));

    let Some((count, sides)) = parsed else {
        return format!("Can't roll {spec:?}. Use NdM with up to {MAX_DICE} dice of up to {MAX_SIDES} sides.");
    };

    let rolls: Vec<u32> = (0..count).map(|_| rng.random_range(1..=sides)).collect();
    let total: u32 = rolls.iter().sum();
    if count == 1 {
        format!("🎲 {total}")
    } else {
        let parts: Vec<String> = rolls.iter().map(u32::to_string).collect();
        format!("🎲 {} = {total}", parts.join(" + "))
    }
}
