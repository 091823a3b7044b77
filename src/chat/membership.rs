use serde_json::json;
use tracing::{debug, info};

use crate::{
    error::{ChatError, ChatResult},
    model::{GROUP_ROOMS, GroupRoom},
    store::{Batch, DocPath, DocumentStore, Fields, StoreError},
};

const JOIN_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRoomDefaults {
    pub name: String,
    pub description: String,
    pub avatar_url: Option<String>,
}

impl Default for GroupRoomDefaults {
    fn default() -> Self {
        Self {
            name: "World".to_owned(),
            description: "Everyone who signs in lands here".to_owned(),
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Created,
    Joined,
    AlreadyMember,
}

/// Makes sure the group room exists and lists `identity_id` exactly once.
///
/// Joining is an array-union plus an increment in one update that only
/// applies if the room is unchanged since it was read, so `memberCount`
/// always equals the number of members. A member already listed costs no
/// writes.
pub async fn ensure_group_room(
    store: &dyn DocumentStore,
    room_id: &str,
    defaults: &GroupRoomDefaults,
    identity_id: &str,
) -> ChatResult<Membership> {
    let path = DocPath::new(GROUP_ROOMS, room_id)?;

    for attempt in 1..=JOIN_ATTEMPTS {
        let Some(doc) = store.get(&path).await? else {
            let fields = Fields::new()
                .value("name", defaults.name.as_str())
                .value("description", defaults.description.as_str())
                .value("avatarUrl", defaults.avatar_url.clone())
                .value("members", json!([identity_id]))
                .value("memberCount", 1)
                .server_timestamp("createdAt");
            match store.create(path.clone(), fields).await {
                Ok(()) => {
                    info!(room = room_id, creator = identity_id, "group room created");
                    return Ok(Membership::Created);
                }
                Err(StoreError::AlreadyExists(_)) => {
                    debug!(room = room_id, attempt, "group room created concurrently");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let room: GroupRoom = doc.decode()?;
        if room.members.iter().any(|member| member == identity_id) {
            return Ok(Membership::AlreadyMember);
        }

        let mut batch = Batch::new();
        batch.update_if_unchanged(
            path.clone(),
            Fields::new().array_union("members", vec![json!(identity_id)]).increment("memberCount", 1),
            doc.update_time,
        );
        match store.commit(batch).await {
            Ok(()) => {
                info!(room = room_id, member = identity_id, "joined group room");
                return Ok(Membership::Joined);
            }
            Err(StoreError::Conflict(_)) => {
                debug!(room = room_id, attempt, "group room changed while joining");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ChatError::Store(StoreError::Conflict(path)))
}
