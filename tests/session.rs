mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Notify;

use common::{FixedIdentity, RecordingView, StubHost, feed_texts, latest_badge, latest_feed, start, start_with, user};
use worldchat::{
    chat::{ChatClient, ChatConfig, ChatTarget, FeedTarget, Slot, ViewEvent, view::{DirectoryList, NoticeLevel}},
    error::{ChatError, ChatResult},
    model::{GROUP_ROOMS, GroupRoom, Identity, MESSAGES, READ, RECEIVER_ID, RoomRef, SENDER_ID, TIMESTAMP},
    rooms::{ClientAction, spawn_dispatcher},
    store::{DocPath, DocumentStore, Fields, MemoryStore},
    upload::{ImageFile, ImageHost},
};

fn online_in_directory(events: &[ViewEvent], id: &str) -> Option<bool> {
    events.iter().rev().find_map(|event| match event {
        ViewEvent::Directory { list: DirectoryList::Primary, entries, .. } => {
            Some(entries.iter().find(|entry| entry.id == id).map(|entry| entry.online))
        }
        _ => None,
    })?
}

#[tokio::test]
async fn two_people_chat_in_the_group_room() {
    let store = MemoryStore::new();
    let (ada, ada_view) = start(&store, user("u1", "Ada")).await;
    let (grace, grace_view) = start(&store, user("u2", "Grace")).await;

    let room: GroupRoom = store
        .get(&DocPath::new(GROUP_ROOMS, "world").unwrap())
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(room.members, ["u1", "u2"]);
    assert_eq!(room.member_count, 2);

    ada.send_text(&ChatTarget::Group, "hello <b>world</b> :)").await.unwrap();
    grace.send_text(&ChatTarget::Group, "hi Ada").await.unwrap();

    grace_view.wait_until("both messages", |events| feed_texts(events, FeedTarget::Group).len() == 2).await;
    let feed = latest_feed(&grace_view.events(), FeedTarget::Group).unwrap();
    assert_eq!(feed[0].sender_name, "Ada");
    assert_eq!(feed[0].html, "hello &lt;b&gt;world&lt;/b&gt; 😊");
    assert_eq!(feed[0].sender_online, Some(true));
    assert_eq!(feed[1].sender_name, "You");
    assert!(feed[1].is_self);
    assert!(feed[0].timestamp < feed[1].timestamp);

    ada_view.wait_until("grace's reply", |events| feed_texts(events, FeedTarget::Group).len() == 2).await;
    let feed = latest_feed(&ada_view.events(), FeedTarget::Group).unwrap();
    assert_eq!(feed[0].sender_name, "You");
    assert_eq!(feed[1].sender_name, "Grace");
    assert!(ada_view.events().contains(&ViewEvent::ScrollToNewest { target: FeedTarget::Group }));

    // group messages never count as unread
    assert_eq!(latest_badge(&ada_view.events(), "u2"), None);

    ada_view.wait_until("grace listed online", |events| online_in_directory(events, "u2") == Some(true)).await;
    grace.shutdown().await;
    ada_view.wait_until("grace listed offline", |events| online_in_directory(events, "u2") == Some(false)).await;
    assert_eq!(online_in_directory(&ada_view.events(), "u1"), None);
}

#[tokio::test]
async fn links_and_emoji_render_for_both_sides() {
    let store = MemoryStore::new();
    let (ada, ada_view) = start(&store, user("u1", "Ada")).await;
    let (_grace, grace_view) = start(&store, user("u2", "Grace")).await;

    ada.send_text(&ChatTarget::Group, "hello http://x.test :)").await.unwrap();
    let expected =
        r#"hello <a href="http://x.test" target="_blank" rel="noopener noreferrer">http://x.test</a> 😊"#;

    ada_view.wait_until("own message", |events| feed_texts(events, FeedTarget::Group) == [expected]).await;
    assert_eq!(latest_feed(&ada_view.events(), FeedTarget::Group).unwrap()[0].sender_name, "You");

    grace_view.wait_until("ada's message", |events| feed_texts(events, FeedTarget::Group) == [expected]).await;
    assert_eq!(latest_feed(&grace_view.events(), FeedTarget::Group).unwrap()[0].sender_name, "Ada");
}

#[tokio::test]
async fn an_empty_room_says_so() {
    let store = MemoryStore::new();
    let (_ada, view) = start(&store, user("u1", "Ada")).await;
    view.wait_until("empty group feed", |events| {
        events.contains(&ViewEvent::EmptyFeed { target: FeedTarget::Group })
    })
    .await;
    assert!(view.events().contains(&ViewEvent::Title { title: "World Chat".into() }));
}

#[tokio::test]
async fn switching_private_chats_keeps_one_feed() {
    let store = MemoryStore::new();
    let path = RoomRef::private_between("u1", "p5").room_path().unwrap().child(MESSAGES, "m1").unwrap();
    store
        .create(
            path,
            Fields::new()
                .value("text", "from p5")
                .value(SENDER_ID, "p5")
                .value(RECEIVER_ID, "u1")
                .value(READ, false)
                .server_timestamp(TIMESTAMP),
        )
        .await
        .unwrap();

    let (ada, view) = start(&store, user("u1", "Ada")).await;
    let standing = store.stats().active_listens();
    assert_eq!(standing, 3);

    for partner in ["p1", "p2", "p3", "p4", "p5"] {
        ada.open_private(partner).await.unwrap();
    }
    assert!(ada.is_attached(Slot::PrivateFeed));
    assert_eq!(store.stats().active_listens(), standing + 1);
    assert_eq!(ada.active_private().as_deref(), Some("p5"));

    view.wait_until("p5's messages", |events| feed_texts(events, FeedTarget::Private) == ["from p5"]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(feed_texts(&view.events(), FeedTarget::Private), ["from p5"]);
    let feed = latest_feed(&view.events(), FeedTarget::Private).unwrap();
    assert_eq!(feed[0].sender_name, worldchat::model::DEFAULT_NAME);

    ada.close_private();
    assert!(!ada.is_attached(Slot::PrivateFeed));
    assert_eq!(store.stats().active_listens(), standing);
    assert!(view.events().contains(&ViewEvent::ActiveChat { partner_id: None }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn page_actions_apply_in_arrival_order() {
    let store = MemoryStore::new();
    let (ada, view) = start(&store, user("u1", "Ada")).await;
    let ada = Arc::new(ada);
    let identity = Arc::new(FixedIdentity::new(Some(user("u1", "Ada"))));
    let standing = store.stats().active_listens();

    for round in 0..20 {
        let (actions, dispatcher) = spawn_dispatcher(ada.clone(), identity.clone());
        actions.send(ClientAction::OpenPrivate { partner_id: "pA".into() }).unwrap();
        actions.send(ClientAction::OpenPrivate { partner_id: "pB".into() }).unwrap();
        drop(actions);
        dispatcher.await.unwrap();

        assert_eq!(ada.active_private().as_deref(), Some("pB"), "round {round}");
        assert_eq!(store.stats().active_listens(), standing + 1);
    }

    let last_active = view.events().into_iter().rev().find_map(|event| match event {
        ViewEvent::ActiveChat { partner_id } => Some(partner_id),
        _ => None,
    });
    assert_eq!(last_active, Some(Some("pB".to_owned())));
}

#[tokio::test]
async fn invalid_partners_are_rejected_before_any_write() {
    let store = MemoryStore::new();
    let (ada, view) = start(&store, user("u1", "Ada")).await;
    let writes = store.stats().writes;

    assert!(matches!(ada.open_private("u1").await, Err(ChatError::InvalidTarget(_))));
    assert!(matches!(ada.open_private("a/b").await, Err(ChatError::InvalidTarget(_))));
    let to_self = ChatTarget::Private { partner_id: "u1".into() };
    assert!(matches!(ada.send_text(&to_self, "hi").await, Err(ChatError::InvalidTarget(_))));

    assert_eq!(store.stats().writes, writes);
    assert!(!ada.is_attached(Slot::PrivateFeed));
    assert!(view.events().iter().any(|event| matches!(
        event,
        ViewEvent::Notice { notice } if notice.level == NoticeLevel::Info
    )));
}

#[tokio::test]
async fn composer_is_disabled_while_sending() {
    let store = MemoryStore::new();
    let (ada, view) = start(&store, user("u1", "Ada")).await;
    view.clear();

    ada.send_text(&ChatTarget::Group, "  spaced  ").await.unwrap();
    let composer: Vec<_> = view
        .events()
        .into_iter()
        .filter(|event| matches!(event, ViewEvent::Composer { .. }))
        .collect();
    assert_eq!(
        composer,
        [
            ViewEvent::Composer { target: FeedTarget::Group, enabled: false },
            ViewEvent::Composer { target: FeedTarget::Group, enabled: true },
        ]
    );
    view.wait_until("trimmed text", |events| feed_texts(events, FeedTarget::Group) == ["spaced"]).await;

    view.clear();
    assert!(matches!(ada.send_text(&ChatTarget::Group, "   ").await, Err(ChatError::EmptyMessage)));
    assert!(!view.events().iter().any(|event| matches!(event, ViewEvent::Composer { .. })));
}

#[tokio::test]
async fn composer_comes_back_when_the_write_fails() {
    let store = MemoryStore::new();
    let (ada, view) = start(&store, user("u1", "Ada")).await;
    store.set_online(false);
    view.clear();

    let err = ada.send_text(&ChatTarget::Group, "lost").await.unwrap_err();
    assert!(matches!(err, ChatError::Store(_)));
    let events = view.events();
    assert!(events.contains(&ViewEvent::Composer { target: FeedTarget::Group, enabled: true }));
    assert!(events.iter().any(|event| matches!(
        event,
        ViewEvent::Notice { notice } if notice.level == NoticeLevel::Error
    )));
}

#[tokio::test]
async fn lost_connection_shows_a_notice_and_recovers() {
    let store = MemoryStore::new();
    let (_ada, view) = start(&store, user("u1", "Ada")).await;
    view.wait_until("initial feed", |events| latest_feed(events, FeedTarget::Group).is_some()).await;

    store.set_online(false);
    view.wait_until("reconnecting notice", |events| {
        events.iter().any(|event| matches!(
            event,
            ViewEvent::Notice { notice } if notice.level == NoticeLevel::Warning
        ))
    })
    .await;

    view.clear();
    store.set_online(true);
    view.wait_until("feed redelivered", |events| latest_feed(events, FeedTarget::Group).is_some()).await;
}

#[tokio::test]
async fn images_are_uploaded_then_sent() {
    let store = MemoryStore::new();
    let (ada, _) = start(&store, user("u1", "Ada")).await;
    let (_grace, grace_view) = start(&store, user("u2", "Grace")).await;

    let file = ImageFile { name: "cat.png".into(), content_type: "image/png".into(), bytes: vec![1, 2, 3] };
    ada.send_image(&ChatTarget::Group, file).await.unwrap();

    grace_view
        .wait_until("image message", |events| {
            latest_feed(events, FeedTarget::Group)
                .is_some_and(|feed| feed.len() == 1 && feed[0].image_url.as_deref() == Some("https://img.test/cat.png"))
        })
        .await;

    let text = ImageFile { name: "notes.txt".into(), content_type: "text/plain".into(), bytes: vec![1] };
    assert!(matches!(
        ada.send_image(&ChatTarget::Group, text).await,
        Err(ChatError::UnsupportedUpload { .. })
    ));
}

/// Holds every upload until the gate is opened.
struct GatedHost {
    gate: Notify,
}

#[async_trait]
impl ImageHost for GatedHost {
    async fn upload(&self, file: &ImageFile) -> ChatResult<String> {
        self.gate.notified().await;
        Ok(format!("https://img.test/{}", file.name))
    }
}

#[tokio::test]
async fn composer_stays_disabled_for_the_whole_upload() {
    let store = MemoryStore::new();
    let host = Arc::new(GatedHost { gate: Notify::new() });
    let view = Arc::new(RecordingView::default());
    let ada = Arc::new(
        ChatClient::start(user("u1", "Ada"), Arc::new(store.clone()), view.clone(), host.clone(), ChatConfig::default())
            .await
            .unwrap(),
    );
    view.clear();

    let png = |name: &str| ImageFile { name: name.into(), content_type: "image/png".into(), bytes: vec![1, 2, 3] };
    let sending = tokio::spawn({
        let ada = ada.clone();
        let file = png("cat.png");
        async move { ada.send_image(&ChatTarget::Group, file).await }
    });

    let disabled = ViewEvent::Composer { target: FeedTarget::Group, enabled: false };
    let enabled = ViewEvent::Composer { target: FeedTarget::Group, enabled: true };
    view.wait_until("composer disabled", |events| events.contains(&disabled)).await;

    // a second file is turned away without re-enabling the busy composer
    assert!(matches!(ada.send_image(&ChatTarget::Group, png("dog.png")).await, Err(ChatError::UploadBusy)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!view.events().contains(&enabled));

    host.gate.notify_one();
    sending.await.unwrap().unwrap();
    let composer: Vec<_> = view
        .events()
        .into_iter()
        .filter(|event| matches!(event, ViewEvent::Composer { .. }))
        .collect();
    assert_eq!(composer, [disabled, enabled]);
}

#[tokio::test]
async fn bootstrap_without_identity_redirects_to_login() {
    let store = MemoryStore::new();
    let view = Arc::new(RecordingView::default());
    let identity = FixedIdentity::new(None);

    let client = ChatClient::bootstrap(&identity, Arc::new(store.clone()), view.clone(), Arc::new(StubHost), ChatConfig::default())
        .await
        .unwrap();
    assert!(client.is_none());
    assert_eq!(view.events(), [ViewEvent::RedirectToLogin]);
    assert_eq!(store.stats().writes, 0);
}

#[tokio::test]
async fn failed_startup_asks_for_a_reload() {
    let store = MemoryStore::new();
    store.set_online(false);
    let view = Arc::new(RecordingView::default());
    let identity = FixedIdentity::new(Some(user("u1", "Ada")));

    let result = ChatClient::bootstrap(&identity, Arc::new(store.clone()), view.clone(), Arc::new(StubHost), ChatConfig::default()).await;
    assert!(result.is_err());
    assert_eq!(view.events().last(), Some(&ViewEvent::Reload { after_ms: 3_000 }));
}

#[tokio::test]
async fn signing_out_detaches_and_goes_offline() {
    let store = MemoryStore::new();
    let view = Arc::new(RecordingView::default());
    let identity = FixedIdentity::new(Some(user("u1", "Ada")));

    let client = ChatClient::bootstrap(&identity, Arc::new(store.clone()), view.clone(), Arc::new(StubHost), ChatConfig::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.stats().active_listens(), 3);

    client.sign_out(&identity).await.unwrap();
    assert_eq!(store.stats().active_listens(), 0);
    assert_eq!(view.events().last(), Some(&ViewEvent::RedirectToLogin));
    assert!(identity.user.lock().unwrap().is_none());

    let me: Identity = store.get(&Identity::path("u1").unwrap()).await.unwrap().unwrap().decode().unwrap();
    assert!(!me.online);
}

#[tokio::test]
async fn the_assistant_answers_commands() {
    let store = MemoryStore::new();
    let config = ChatConfig { assistant_id: Some("assistant".into()), ..ChatConfig::default() };
    let (ada, view) = start_with(&store, user("u1", "Ada"), config).await;
    assert!(ada.is_attached(Slot::Responder));

    let to_assistant = ChatTarget::Private { partner_id: "assistant".into() };
    ada.send_text(&to_assistant, "/echo hey there").await.unwrap();
    view.wait_until("reply badge", |events| latest_badge(events, "assistant") == Some(1)).await;

    ada.open_private("assistant").await.unwrap();
    view.wait_until("reply in the private feed", |events| {
        feed_texts(events, FeedTarget::Private) == ["/echo hey there", "hey there"]
    })
    .await;
    let feed = latest_feed(&view.events(), FeedTarget::Private).unwrap();
    assert_eq!(feed[1].sender_name, "Assistant");
    assert_eq!(feed[1].sender_online, Some(true));
}
