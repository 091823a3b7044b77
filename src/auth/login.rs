use axum::{debug_handler, extract::{Path, Query, State}, response::{Html, IntoResponse, Redirect, Response}};
use oauth2::{CsrfToken, PkceCodeChallenge, Scope};
use serde::Deserialize;
use std::sync::Arc;
use tower_sessions::Session;
use tracing::debug;

use crate::{config::Config, format::escape, include_res, session::{CSRF_STATE, PKCE_VERIFIER, RETURN_URL}, AppResult, AppState};

use super::{clients::ClientProvider, Clients};

#[derive(Deserialize)]
pub struct LoginQuery {
    pub return_url: Option<String>,
}

#[debug_handler(state = AppState)]
pub async fn login_page(
    State(clients): State<Clients>,
    State(config): State<Arc<Config>>,
) -> impl IntoResponse {
    let buttons: String = clients
        .providers()
        .into_iter()
        .map(|provider| {
            format!(r#"<a class="provider" href="/login/{}">Continue with {provider}</a>"#, provider.path())
        })
        .collect();

    Html(
        include_res!(str, "/pages/login.html")
            .replace("{app_name}", &escape(&config.app_name))
            .replace("{providers}", &buttons)
    )
}

#[debug_handler(state = AppState)]
pub async fn login(
    Path(provider): Path<ClientProvider>,
    Query(LoginQuery { return_url }): Query<LoginQuery>,
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<Response> {
    let client = clients.get_client(provider)?;

    let (pkce_code_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let (authorize_url, csrf_state) = client.authorize_url(CsrfToken::new_random)
        .add_scopes(provider.scopes().iter().map(|scope| Scope::new(scope.to_string())))
        .set_pkce_challenge(pkce_code_challenge)
        .url();

    session.insert(CSRF_STATE, csrf_state.secret()).await?;
    session.insert(PKCE_VERIFIER, pkce_verifier.secret()).await?;
    if let Some(return_url) = return_url {
        session.insert(RETURN_URL, return_url).await?;
    }

    debug!(%provider, "redirecting to provider");
    Ok(Redirect::to(authorize_url.as_str()).into_response())
}
