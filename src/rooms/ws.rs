use std::sync::Arc;

use axum::{debug_handler, extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}}, response::IntoResponse};
use base64::{Engine, engine::general_purpose::STANDARD};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tower_sessions::Session;
use tracing::{debug, warn};

use crate::{
    chat::{ChannelView, ChatClient, ChatConfig, ChatTarget, IdentityProvider, Notice, ViewEvent},
    config::Config,
    session::SessionIdentity,
    store::DocumentStore,
    upload::{ImageFile, ImageHost},
    AppState,
};

/// What the page asks the controller to do.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Send { target: ChatTarget, text: String },
    /// `data` is the file's bytes in standard base64.
    Upload { target: ChatTarget, name: String, content_type: String, data: String },
    OpenPrivate { partner_id: String },
    ClosePrivate,
    SignOut,
}

#[debug_handler(state = AppState)]
pub async fn chat_ws(
    State(store): State<Arc<dyn DocumentStore>>,
    State(image_host): State<Arc<dyn ImageHost>>,
    State(config): State<Arc<Config>>,
    session: Session,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let chat_config = config.chat_config();
    ws.on_upgrade(async move |socket| {
        run(socket, SessionIdentity(session), store, image_host, chat_config).await
    })
}

async fn run(
    socket: WebSocket,
    identity: SessionIdentity,
    store: Arc<dyn DocumentStore>,
    image_host: Arc<dyn ImageHost>,
    chat_config: ChatConfig,
) {
    let (view, mut events) = ChannelView::new();
    let (mut sender, mut receiver) = socket.split();

    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%err, "unserializable view event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let client = match ChatClient::bootstrap(&identity, store, Arc::new(view), image_host, chat_config).await {
        Ok(Some(client)) => Arc::new(client),
        // the view is gone with the failed start; let the queued events drain
        Ok(None) | Err(_) => {
            let _ = forward_task.await;
            return;
        }
    };

    let (actions, dispatch_task) = spawn_dispatcher(client.clone(), Arc::new(identity));
    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let action = match serde_json::from_str::<ClientAction>(text.as_str()) {
                Ok(action) => action,
                Err(err) => {
                    debug!(%err, "ignoring malformed client action");
                    continue;
                }
            };
            if actions.send(action).is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut forward_task => receive_task.abort(),
        _ = &mut receive_task => forward_task.abort(),
    };
    dispatch_task.abort();

    client.shutdown().await;
}

/// Runs the page's actions one at a time in arrival order, so the last
/// navigation the page asked for is the one that stays active.
pub fn spawn_dispatcher(
    client: Arc<ChatClient>,
    identity: Arc<dyn IdentityProvider>,
) -> (mpsc::UnboundedSender<ClientAction>, JoinHandle<()>) {
    let (actions, mut queue) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(action) = queue.recv().await {
            dispatch(&client, identity.as_ref(), action).await;
        }
    });
    (actions, task)
}

async fn dispatch(client: &ChatClient, identity: &dyn IdentityProvider, action: ClientAction) {
    let result = match action {
        ClientAction::Send { target, text } => client.send_text(&target, &text).await,
        ClientAction::Upload { target, name, content_type, data } => match STANDARD.decode(data) {
            Ok(bytes) => client.send_image(&target, ImageFile { name, content_type, bytes }).await,
            Err(err) => {
                debug!(%err, %name, "undecodable upload");
                client.context().emit(ViewEvent::Notice { notice: Notice::info(format!("Could not read {name}")) });
                return;
            }
        },
        ClientAction::OpenPrivate { partner_id } => client.open_private(&partner_id).await,
        ClientAction::ClosePrivate => {
            client.close_private();
            Ok(())
        }
        ClientAction::SignOut => client.sign_out(identity).await,
    };

    if let Err(err) = result {
        debug!(%err, "client action failed");
    }
}
