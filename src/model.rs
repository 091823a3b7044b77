//! Documents as the chat stores them.
//!
//! Field names are camelCase on the wire; the constants below are the ones
//! queries filter on.

use serde::{Deserialize, Serialize};

use crate::store::{DocPath, Document, StoreResult};

pub const IDENTITIES: &str = "identities";
pub const GROUP_ROOMS: &str = "groups";
pub const PRIVATE_ROOMS: &str = "private_chats";
pub const MESSAGES: &str = "messages";

pub const WORLD_ROOM_ID: &str = "world";

pub const SENDER_ID: &str = "senderId";
pub const RECEIVER_ID: &str = "receiverId";
pub const READ: &str = "read";
pub const READ_AT: &str = "readAt";
pub const TIMESTAMP: &str = "timestamp";
pub const PROCESSED: &str = "processed";

pub const DEFAULT_NAME: &str = "Unknown user";
pub const DEFAULT_AVATAR: &str = "/static/avatar.svg";

/// Who the identity provider says is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedInUser {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<i64>,
}

impl Identity {
    pub fn from_document(doc: &Document) -> StoreResult<Self> {
        let mut identity: Identity = doc.decode()?;
        if identity.id.is_empty() {
            identity.id = doc.id().to_owned();
        }
        Ok(identity)
    }

    pub fn path(id: &str) -> StoreResult<DocPath> {
        DocPath::new(IDENTITIES, id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRoom {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub member_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<bool>,
}

impl Message {
    pub fn from_document(doc: &Document) -> StoreResult<Self> {
        let mut message: Message = doc.decode()?;
        message.id = doc.id().to_owned();
        Ok(message)
    }
}

/// Private rooms have no document of their own; both participants derive the
/// same id from the sorted pair. Ids are escaped so the one unescaped `_`
/// always separates the two participants.
pub fn private_room_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}_{}", escape_room_part(first), escape_room_part(second))
}

fn escape_room_part(id: &str) -> String {
    id.replace('%', "%25").replace('_', "%5F").replace('/', "%2F")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomRef {
    Group { room_id: String },
    Private { room_id: String, partner_id: String },
}

impl RoomRef {
    pub fn group(room_id: &str) -> Self {
        RoomRef::Group { room_id: room_id.to_owned() }
    }

    pub fn private_between(me: &str, partner: &str) -> Self {
        RoomRef::Private { room_id: private_room_id(me, partner), partner_id: partner.to_owned() }
    }

    pub fn room_path(&self) -> StoreResult<DocPath> {
        match self {
            RoomRef::Group { room_id } => DocPath::new(GROUP_ROOMS, room_id),
            RoomRef::Private { room_id, .. } => DocPath::new(PRIVATE_ROOMS, room_id),
        }
    }

    /// Collection path of this room's messages.
    pub fn messages(&self) -> StoreResult<String> {
        Ok(format!("{}/{MESSAGES}", self.room_path()?))
    }

    pub fn partner(&self) -> Option<&str> {
        match self {
            RoomRef::Group { .. } => None,
            RoomRef::Private { partner_id, .. } => Some(partner_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn private_room_id_is_order_independent() {
        assert_eq!(private_room_id("bob", "alice"), "alice_bob");
        assert_eq!(private_room_id("alice", "bob"), "alice_bob");
        assert_eq!(
            RoomRef::private_between("bob", "alice").messages().unwrap(),
            "private_chats/alice_bob/messages"
        );
    }

    #[test]
    fn distinct_pairs_never_share_a_room() {
        assert_eq!(private_room_id("a_b", "c"), "a%5Fb_c");
        assert_eq!(private_room_id("a", "b_c"), "a_b%5Fc");
        assert_ne!(private_room_id("a%5Fb", "c"), private_room_id("a_b", "c"));
        assert!(RoomRef::private_between("x/y", "z").room_path().is_ok());
    }

    #[test]
    fn group_messages_carry_no_read_state() {
        let message = Message {
            id: "m1".into(),
            text: "hi".into(),
            sender_id: "a".into(),
            sender_name: Some("A".into()),
            sender_avatar: None,
            timestamp: None,
            image_url: None,
            receiver_id: None,
            read: None,
            read_at: None,
            processed: None,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("read").is_none());
        assert!(value.get("id").is_none());
    }

    #[test]
    fn identity_falls_back_to_document_id() {
        let serde_json::Value::Object(data) = json!({"displayName": "Ada", "online": true}) else {
            unreachable!()
        };
        let doc = Document { path: Identity::path("ada").unwrap(), data, update_time: 1 };
        let identity = Identity::from_document(&doc).unwrap();
        assert_eq!(identity.id, "ada");
        assert!(identity.online);
        assert_eq!(identity.avatar_url, None);
    }
}
