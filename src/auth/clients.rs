use std::fmt;

use oauth2::{basic::BasicClient, AuthUrl, Client, ClientId, ClientSecret, RedirectUrl, TokenUrl};
use serde::Deserialize;
use serde_json::Value;

use crate::{AppResult, GetField};

type ProviderClient = Client<oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>, oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardTokenIntrospectionResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardRevocableToken, oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>, oauth2::EndpointSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointSet>;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Google,
    Github,
}

impl ClientProvider {
    pub fn id(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google.com",
            Github => "github.com",
        }
    }

    pub fn path(&self) -> &'static str {
        use ClientProvider::*;
        match self {
            Google => "google",
            Github => "github",
        }
    }

    fn endpoints(&self) -> (&str, &str) {
        use ClientProvider::*;
        match self {
            Google => ("https://accounts.google.com/o/oauth2/auth", "https://oauth2.googleapis.com/token"),
            Github => ("https://github.com/login/oauth/authorize", "https://github.com/login/oauth/access_token"),
        }
    }

    pub fn scopes(&self) -> &'static [&'static str] {
        use ClientProvider::*;
        match self {
            Google => &["openid", "email", "profile"],
            Github => &["read:user", "user:email"],
        }
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// OAuth clients per provider plus the identity-toolkit endpoint that turns a
/// provider token into a stable user id.
#[derive(Clone)]
pub struct Clients {
    pub(crate) idp_url: String,
    google_client: Option<ProviderClient>,
    github_client: Option<ProviderClient>,
}

impl Clients {
    /// `json` holds `firebase.apikey` and optional `google` / `github`
    /// sections with `client_id` and `client_secret`.
    pub fn from_json(json: Value, public_url: &str) -> AppResult<Clients> {
        let idp_url = format!(
            "https://identitytoolkit.googleapis.com/v1/accounts:signInWithIdp?key={}",
            json.get_obj_field("firebase")?.get_str_field("apikey")?
        );

        Ok(
            Clients {
                idp_url,
                google_client: provider_client(&json, ClientProvider::Google, public_url)?,
                github_client: provider_client(&json, ClientProvider::Github, public_url)?,
            }
        )
    }

    pub fn get_client(&self, provider: ClientProvider) -> AppResult<ProviderClient> {
        use ClientProvider::*;
        match provider {
            Google => self.google_client.clone(),
            Github => self.github_client.clone(),
        }.ok_or(format!("OAuth provider {provider} keys not supplied").into())
    }

    pub fn providers(&self) -> Vec<ClientProvider> {
        let mut providers = Vec::new();
        if self.google_client.is_some() {
            providers.push(ClientProvider::Google);
        }
        if self.github_client.is_some() {
            providers.push(ClientProvider::Github);
        }
        providers
    }
}

fn provider_client(json: &Value, provider: ClientProvider, public_url: &str) -> AppResult<Option<ProviderClient>> {
    let Some(json) = json.get(provider.path()) else {
        return Ok(None);
    };
    let client_id = ClientId::new(json.get_str_field("client_id")?);
    let client_secret = ClientSecret::new(json.get_str_field("client_secret")?);

    let (auth_url, token_url) = provider.endpoints();
    let auth_url = AuthUrl::new(auth_url.to_owned())?;
    let token_url = TokenUrl::new(token_url.to_owned())?;
    let redirect_url = RedirectUrl::new(format!("{public_url}/lockin/{}", provider.path()))?;

    Ok(Some(
        BasicClient::new(client_id)
        .set_client_secret(client_secret)
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url)
    ))
}
