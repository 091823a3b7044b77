use std::sync::Arc;

use axum::{debug_handler, extract::State, response::{Html, IntoResponse, Redirect, Response}};
use tower_sessions::Session;

use crate::{config::Config, format::escape, include_res, model::SignedInUser, session::USER, AppResult, AppState};

#[debug_handler(state = AppState)]
pub async fn index(
    State(config): State<Arc<Config>>,
    session: Session
) -> AppResult<Response> {
    let Some(user) = session.get::<SignedInUser>(USER).await? else {
        return Ok(
            Redirect::to("/login")
                .into_response()
        );
    };

    Ok(
        Html(
            include_res!(str, "/pages/index.html")
                .replace("{app_name}", &escape(&config.app_name))
                .replace("{user_id}", &escape(&user.id))
                .replace("{display_name}", &escape(&user.display_name))
        ).into_response()
    )
}
