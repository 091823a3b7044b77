//! The realtime chat engine.
//!
//! A [`ChatClient`] is one signed-in tab: it owns the session context and the
//! live subscriptions, and is the only thing that changes which private room
//! is active. Components hold an `Arc<ChatContext>` and push what they
//! compute into the context's [`View`].

pub mod composer;
pub mod directory;
pub mod feed;
pub mod membership;
pub mod presence;
pub mod read_state;
pub mod subscriptions;
pub mod unread;
pub mod view;

use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use tracing::{error, info, warn};

pub use composer::ChatTarget;
pub use membership::{GroupRoomDefaults, Membership};
pub use subscriptions::{Slot, SubscriptionHandle, SubscriptionRegistry};
pub use unread::BadgeBoard;
pub use view::{ChannelView, FeedTarget, Notice, View, ViewEvent};

use crate::{
    error::{ChatError, ChatResult, ErrorKind},
    model::{RoomRef, SignedInUser, WORLD_ROOM_ID},
    responder,
    store::DocumentStore,
    upload::{ImageFile, ImageHost, UploadConfig, Uploader},
};

pub const RELOAD_DELAY_MS: u64 = 3_000;

/// Source of the signed-in identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` means signed out.
    async fn current(&self) -> Option<SignedInUser>;

    async fn sign_out(&self) -> ChatResult<()>;
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub app_name: String,
    pub group_room_id: String,
    pub group_room: GroupRoomDefaults,
    pub upload: UploadConfig,
    /// Identity of the command responder; `None` disables it.
    pub assistant_id: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            app_name: "World Chat".to_owned(),
            group_room_id: WORLD_ROOM_ID.to_owned(),
            group_room: GroupRoomDefaults::default(),
            upload: UploadConfig::default(),
            assistant_id: None,
        }
    }
}

/// Everything one signed-in session shares between its components.
pub struct ChatContext {
    pub me: SignedInUser,
    pub store: Arc<dyn DocumentStore>,
    pub view: Arc<dyn View>,
    pub config: ChatConfig,
    badges: Mutex<BadgeBoard>,
    displayed: Mutex<BTreeSet<String>>,
    active_private: Mutex<Option<String>>,
    group_feed: AtomicU64,
    private_feed: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChatContext {
    pub fn new(me: SignedInUser, store: Arc<dyn DocumentStore>, view: Arc<dyn View>, config: ChatConfig) -> Self {
        Self {
            me,
            store,
            view,
            config,
            badges: Mutex::default(),
            displayed: Mutex::default(),
            active_private: Mutex::default(),
            group_feed: AtomicU64::new(0),
            private_feed: AtomicU64::new(0),
        }
    }

    pub fn emit(&self, event: ViewEvent) {
        self.view.emit(event);
    }

    /// Turns an error into a notice; nothing here is fatal.
    pub fn report(&self, err: &ChatError) {
        let notice = match err.kind() {
            ErrorKind::Transient => {
                warn!(%err, "operation failed");
                Notice::error(format!("Connection problem: {err}"))
            }
            ErrorKind::Validation | ErrorKind::Busy => Notice::info(err.to_string()),
            ErrorKind::NotFound => return,
        };
        self.emit(ViewEvent::Notice { notice });
    }

    pub fn badges(&self) -> MutexGuard<'_, BadgeBoard> {
        lock(&self.badges)
    }

    /// Sets a badge and republishes the title from the rendered badges.
    pub fn set_badge_locally(&self, sender_id: &str, count: u32) {
        let total = {
            let mut badges = self.badges();
            badges.set(sender_id, count);
            badges.total()
        };
        self.emit(ViewEvent::Badge { sender_id: sender_id.to_owned(), count });
        self.emit(ViewEvent::Title { title: unread::title_for(&self.config.app_name, total) });
    }

    pub fn displayed_senders(&self) -> BTreeSet<String> {
        lock(&self.displayed).clone()
    }

    pub(crate) fn set_displayed_senders(&self, ids: BTreeSet<String>) {
        *lock(&self.displayed) = ids;
    }

    pub fn active_private(&self) -> Option<String> {
        lock(&self.active_private).clone()
    }

    pub fn is_active_private(&self, partner_id: &str) -> bool {
        lock(&self.active_private).as_deref() == Some(partner_id)
    }

    fn set_active_private(&self, partner_id: Option<String>) {
        *lock(&self.active_private) = partner_id;
    }

    fn feed_counter(&self, target: FeedTarget) -> &AtomicU64 {
        match target {
            FeedTarget::Group => &self.group_feed,
            FeedTarget::Private => &self.private_feed,
        }
    }

    /// Starts a new generation for `target`; snapshots of older ones are stale.
    pub(crate) fn next_feed_generation(&self, target: FeedTarget) -> u64 {
        self.feed_counter(target).fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn is_current_feed(&self, target: FeedTarget, generation: u64) -> bool {
        self.feed_counter(target).load(Ordering::Acquire) == generation
    }
}

/// Navigation controller for one signed-in tab.
pub struct ChatClient {
    ctx: Arc<ChatContext>,
    registry: Mutex<SubscriptionRegistry>,
    uploader: Uploader,
}

impl ChatClient {
    /// Marks the identity online, joins the group room and attaches every
    /// standing subscription.
    pub async fn start(
        me: SignedInUser,
        store: Arc<dyn DocumentStore>,
        view: Arc<dyn View>,
        image_host: Arc<dyn ImageHost>,
        config: ChatConfig,
    ) -> ChatResult<Self> {
        let uploader = Uploader::new(image_host, config.upload.clone());
        let ctx = Arc::new(ChatContext::new(me, store, view, config));

        presence::go_online(ctx.store.as_ref(), &ctx.me).await?;
        let membership = membership::ensure_group_room(
            ctx.store.as_ref(),
            &ctx.config.group_room_id,
            &ctx.config.group_room,
            &ctx.me.id,
        )
        .await?;
        if let Some(assistant_id) = &ctx.config.assistant_id {
            responder::ensure_assistant(ctx.store.as_ref(), assistant_id).await?;
        }
        info!(user = %ctx.me.id, ?membership, "chat session started");

        let client = Self { ctx, registry: Mutex::new(SubscriptionRegistry::new()), uploader };
        {
            let ctx = &client.ctx;
            let mut registry = client.registry();
            feed::attach(ctx, &mut registry, RoomRef::group(&ctx.config.group_room_id))?;
            directory::attach(ctx, &mut registry);
            unread::attach(ctx, &mut registry);
            if let Some(assistant_id) = &ctx.config.assistant_id {
                responder::attach(ctx, &mut registry, assistant_id)?;
            }
        }
        client.ctx.emit(ViewEvent::Title { title: client.ctx.config.app_name.clone() });
        Ok(client)
    }

    /// Starts a session for whoever `identity` reports. Without an identity
    /// the page is sent to the login entry point; if startup fails the page is
    /// told to reload after [`RELOAD_DELAY_MS`].
    pub async fn bootstrap(
        identity: &dyn IdentityProvider,
        store: Arc<dyn DocumentStore>,
        view: Arc<dyn View>,
        image_host: Arc<dyn ImageHost>,
        config: ChatConfig,
    ) -> ChatResult<Option<Self>> {
        let Some(me) = identity.current().await else {
            view.emit(ViewEvent::RedirectToLogin);
            return Ok(None);
        };

        match Self::start(me, store, view.clone(), image_host, config).await {
            Ok(client) => Ok(Some(client)),
            Err(err) => {
                error!(%err, "chat session failed to start");
                view.emit(ViewEvent::Notice { notice: Notice::error(format!("Could not start chat: {err}")) });
                view.emit(ViewEvent::Reload { after_ms: RELOAD_DELAY_MS });
                Err(err)
            }
        }
    }

    pub fn context(&self) -> &Arc<ChatContext> {
        &self.ctx
    }

    fn registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        lock(&self.registry)
    }

    pub fn is_attached(&self, slot: Slot) -> bool {
        self.registry().is_attached(slot)
    }

    pub fn active_private(&self) -> Option<String> {
        self.ctx.active_private()
    }

    /// Switches the private view to `partner_id` and marks what they sent as read.
    pub async fn open_private(&self, partner_id: &str) -> ChatResult<()> {
        let result = self.switch_private(partner_id).await;
        if let Err(err) = &result {
            self.ctx.report(err);
        }
        result
    }

    async fn switch_private(&self, partner_id: &str) -> ChatResult<()> {
        composer::validate_partner(&self.ctx.me.id, partner_id)?;
        let room = RoomRef::private_between(&self.ctx.me.id, partner_id);

        self.ctx.set_active_private(Some(partner_id.to_owned()));
        {
            let mut registry = self.registry();
            feed::attach(&self.ctx, &mut registry, room)?;
        }
        self.ctx.emit(ViewEvent::ActiveChat { partner_id: Some(partner_id.to_owned()) });
        info!(partner = partner_id, "private chat opened");

        read_state::mark_read(&self.ctx, partner_id).await?;
        Ok(())
    }

    pub fn close_private(&self) {
        self.registry().detach(Slot::PrivateFeed);
        self.ctx.set_active_private(None);
        self.ctx.emit(ViewEvent::ActiveChat { partner_id: None });
    }

    pub async fn send_text(&self, target: &ChatTarget, text: &str) -> ChatResult<()> {
        let result = composer::send(&self.ctx, target, text, None).await;
        if let Err(err) = &result {
            self.ctx.report(err);
        }
        result
    }

    /// Uploads `file` and sends its URL as an image message to `target`. The
    /// composer stays disabled from the start of the upload until the message
    /// is written or either step fails.
    pub async fn send_image(&self, target: &ChatTarget, file: ImageFile) -> ChatResult<()> {
        let result = async {
            composer::resolve_room(&self.ctx, target)?;
            let pending = self.uploader.begin(&file)?;
            let _lock = composer::ComposerLock::engage(self.ctx.view.as_ref(), target.feed());
            let url = pending.send().await?;
            composer::compose(&self.ctx, target, "", Some(url))?.write(&self.ctx).await
        }
        .await;
        if let Err(err) = &result {
            self.ctx.report(err);
        }
        result
    }

    /// Detaches everything and marks the identity offline.
    pub async fn shutdown(&self) {
        self.registry().detach_all();
        self.ctx.set_active_private(None);
        if let Err(err) = presence::go_offline(self.ctx.store.as_ref(), &self.ctx.me.id).await {
            warn!(%err, user = %self.ctx.me.id, "could not mark identity offline");
        }
        info!(user = %self.ctx.me.id, "chat session closed");
    }

    pub async fn sign_out(&self, identity: &dyn IdentityProvider) -> ChatResult<()> {
        self.shutdown().await;
        identity.sign_out().await?;
        self.ctx.emit(ViewEvent::RedirectToLogin);
        Ok(())
    }
}
