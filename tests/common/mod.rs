#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use worldchat::{
    chat::{ChatClient, ChatConfig, FeedTarget, IdentityProvider, View, ViewEvent, view::RenderedMessage},
    error::ChatResult,
    model::SignedInUser,
    store::MemoryStore,
    upload::{ImageFile, ImageHost},
};

/// Keeps every event it is given.
#[derive(Default)]
pub struct RecordingView {
    events: Mutex<Vec<ViewEvent>>,
}

impl View for RecordingView {
    fn emit(&self, event: ViewEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingView {
    pub fn events(&self) -> Vec<ViewEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Polls the recorded events until `done` holds, failing after two seconds.
    pub async fn wait_until(&self, what: &str, done: impl Fn(&[ViewEvent]) -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if done(&self.events()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        if waited.is_err() {
            panic!("timed out waiting for {what}; events: {:#?}", self.events());
        }
    }
}

pub fn latest_title(events: &[ViewEvent]) -> Option<String> {
    events.iter().rev().find_map(|event| match event {
        ViewEvent::Title { title } => Some(title.clone()),
        _ => None,
    })
}

pub fn latest_badge(events: &[ViewEvent], sender: &str) -> Option<u32> {
    events.iter().rev().find_map(|event| match event {
        ViewEvent::Badge { sender_id, count } if sender_id == sender => Some(*count),
        _ => None,
    })
}

/// What `target` currently shows; an empty feed is an empty list.
pub fn latest_feed(events: &[ViewEvent], target: FeedTarget) -> Option<Vec<RenderedMessage>> {
    events.iter().rev().find_map(|event| match event {
        ViewEvent::Messages { target: t, messages } if *t == target => Some(messages.clone()),
        ViewEvent::EmptyFeed { target: t } if *t == target => Some(Vec::new()),
        _ => None,
    })
}

pub fn feed_texts(events: &[ViewEvent], target: FeedTarget) -> Vec<String> {
    latest_feed(events, target)
        .unwrap_or_default()
        .into_iter()
        .map(|message| message.html)
        .collect()
}

pub fn user(id: &str, name: &str) -> SignedInUser {
    SignedInUser { id: id.to_owned(), display_name: name.to_owned(), email: None, avatar_url: None }
}

pub struct StubHost;

#[async_trait]
impl ImageHost for StubHost {
    async fn upload(&self, file: &ImageFile) -> ChatResult<String> {
        Ok(format!("https://img.test/{}", file.name))
    }
}

pub struct FixedIdentity {
    pub user: Mutex<Option<SignedInUser>>,
}

impl FixedIdentity {
    pub fn new(user: Option<SignedInUser>) -> Self {
        Self { user: Mutex::new(user) }
    }
}

#[async_trait]
impl IdentityProvider for FixedIdentity {
    async fn current(&self) -> Option<SignedInUser> {
        self.user.lock().unwrap().clone()
    }

    async fn sign_out(&self) -> ChatResult<()> {
        self.user.lock().unwrap().take();
        Ok(())
    }
}

pub async fn start_with(store: &MemoryStore, me: SignedInUser, config: ChatConfig) -> (ChatClient, Arc<RecordingView>) {
    let view = Arc::new(RecordingView::default());
    let client = ChatClient::start(me, Arc::new(store.clone()), view.clone(), Arc::new(StubHost), config)
        .await
        .unwrap();
    (client, view)
}

pub async fn start(store: &MemoryStore, me: SignedInUser) -> (ChatClient, Arc<RecordingView>) {
    start_with(store, me, ChatConfig::default()).await
}
