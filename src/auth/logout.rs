use std::sync::Arc;

use axum::{debug_handler, extract::{Query, State}, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{chat::presence, model::SignedInUser, session::USER, store::DocumentStore, AppResult, AppState};

use super::safe_return_url;

#[derive(Deserialize)]
pub struct LogoutQuery {
    pub return_url: Option<String>,
}

#[debug_handler(state = AppState)]
pub async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    State(store): State<Arc<dyn DocumentStore>>,
    session: Session
) -> AppResult<Redirect> {
    if let Some(user) = session.get::<SignedInUser>(USER).await? {
        presence::go_offline(store.as_ref(), &user.id).await?;
        info!(user = %user.id, "signed out");
    }
    session.flush().await?;
    Ok(Redirect::to(&safe_return_url(return_url, "/login")))
}
