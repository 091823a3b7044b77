use axum::{debug_handler, extract::{Path, Query, State}, response::{IntoResponse, Redirect}};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::info;

use crate::{
    chat::presence,
    config::Config,
    model::SignedInUser,
    session::{CSRF_STATE, PKCE_VERIFIER, RETURN_URL, USER},
    store::DocumentStore,
    AppResult, AppState, GetField,
};

use super::{clients::ClientProvider, random_alias, safe_return_url, Clients};

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest {
    post_body: String,
    request_uri: String,
    return_idp_credential: bool,
    return_secure_token: bool,
}

#[debug_handler(state = AppState)]
pub async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(store): State<Arc<dyn DocumentStore>>,
    State(clients): State<Clients>,
    State(config): State<Arc<Config>>,
    session: Session,
) -> AppResult<impl IntoResponse> {
    let state = CsrfToken::new(state.ok_or("OAuth: without state")?);
    let code = AuthorizationCode::new(code.ok_or("OAuth: without code")?);

    let Some(stored_state) = session.remove::<String>(CSRF_STATE).await? else {
        return Err("no csrf_state")?;
    };

    if state.secret().as_str() != stored_state.as_str() {
        return Err("csrf tokens don't match")?;
    }

    let Some(pkce_verifier) = session.remove::<String>(PKCE_VERIFIER).await? else {
        return Err("no pkce_verifier")?;
    };

    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(&http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    let body: serde_json::Value = http_client.post(&clients.idp_url)
        .json(&IdpRequest {
            post_body: format!("access_token={access_token}&providerId={}", provider.id()),
            request_uri: config.public_url.clone(),
            return_idp_credential: true,
            return_secure_token: true,
        })
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let user = SignedInUser {
        id: body.get_str_field("localId")?,
        display_name: body.get_opt_str_field("displayName").unwrap_or_else(random_alias),
        email: body.get_opt_str_field("email"),
        avatar_url: body.get_opt_str_field("photoUrl"),
    };
    presence::upsert_identity(store.as_ref(), &user).await?;
    session.cycle_id().await?;
    session.insert(USER, &user).await?;

    info!(user = %user.id, %provider, "signed in");

    let return_url = safe_return_url(session.remove(RETURN_URL).await?, "/");
    Ok(Redirect::to(return_url.as_str()))
}
