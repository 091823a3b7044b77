//! Keys of the server-side session and the session-backed identity.

use async_trait::async_trait;
use tower_sessions::Session;
use tracing::warn;

use crate::{
    chat::IdentityProvider,
    error::{ChatError, ChatResult},
    model::SignedInUser,
};

pub const USER: &str = "user";
pub const CSRF_STATE: &str = "csrf_state";
pub const PKCE_VERIFIER: &str = "pkce_verifier";
pub const RETURN_URL: &str = "return_url";

/// The signed-in user as recorded by the OAuth callback.
#[derive(Clone)]
pub struct SessionIdentity(pub Session);

#[async_trait]
impl IdentityProvider for SessionIdentity {
    async fn current(&self) -> Option<SignedInUser> {
        match self.0.get::<SignedInUser>(USER).await {
            Ok(user) => user,
            Err(err) => {
                warn!(%err, "unreadable session");
                None
            }
        }
    }

    async fn sign_out(&self) -> ChatResult<()> {
        self.0.flush().await.map_err(|err| ChatError::Identity(err.to_string()))
    }
}
