//! What the engine tells the page to draw.
//!
//! Components never touch the page directly; they emit [`ViewEvent`]s into a
//! [`View`]. The web shell forwards them over the socket as JSON, tests
//! record them.

use serde::Serialize;
use tokio::sync::mpsc;

/// Render targets for message feeds and their composers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTarget {
    Group,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryList {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: String,
    /// Live presence of the sender; `None` when the lookup found nothing.
    pub sender_online: Option<bool>,
    pub is_self: bool,
    pub html: String,
    pub image_url: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub online: bool,
    pub last_seen: Option<i64>,
    pub unread: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn reconnecting() -> Self {
        Self { level: NoticeLevel::Warning, text: "Connection lost, reconnecting…".to_owned() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, text: text.into() }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    /// Replaces everything currently shown in `target`.
    Messages { target: FeedTarget, messages: Vec<RenderedMessage> },
    EmptyFeed { target: FeedTarget },
    ScrollToNewest { target: FeedTarget },
    Badge { sender_id: String, count: u32 },
    Title { title: String },
    Directory { list: DirectoryList, entries: Vec<DirectoryEntry>, online_count: usize },
    ActiveChat { partner_id: Option<String> },
    Composer { target: FeedTarget, enabled: bool },
    Notice { notice: Notice },
    RedirectToLogin,
    Reload { after_ms: u64 },
}

pub trait View: Send + Sync {
    fn emit(&self, event: ViewEvent);
}

/// Forwards events to whoever holds the receiving end, usually a socket.
pub struct ChannelView {
    tx: mpsc::UnboundedSender<ViewEvent>,
}

impl ChannelView {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ViewEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl View for ChannelView {
    fn emit(&self, event: ViewEvent) {
        // the page went away; the socket task tears the client down
        let _ = self.tx.send(event);
    }
}
