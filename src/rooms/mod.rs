//! The live socket: one [`ChatClient`](crate::chat::ChatClient) per connected page.

mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use ws::{ClientAction, chat_ws, spawn_dispatcher};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
}
