use tracing::debug;

use crate::{
    error::ChatResult,
    model::{Identity, SignedInUser},
    store::{DocumentStore, Fields, StoreError},
};

/// Writes the provider's profile fields, creating the identity on first login.
pub async fn upsert_identity(store: &dyn DocumentStore, user: &SignedInUser) -> ChatResult<()> {
    let fields = Fields::new()
        .value("id", user.id.as_str())
        .value("displayName", user.display_name.as_str())
        .value("avatarUrl", user.avatar_url.clone())
        .value("email", user.email.clone());
    store.set(Identity::path(&user.id)?, fields, true).await?;
    Ok(())
}

pub async fn go_online(store: &dyn DocumentStore, user: &SignedInUser) -> ChatResult<()> {
    let fields = Fields::new()
        .value("id", user.id.as_str())
        .value("displayName", user.display_name.as_str())
        .value("avatarUrl", user.avatar_url.clone())
        .value("online", true)
        .server_timestamp("lastSeen");
    store.set(Identity::path(&user.id)?, fields, true).await?;
    debug!(user = %user.id, "online");
    Ok(())
}

/// A missing identity is left missing.
pub async fn go_offline(store: &dyn DocumentStore, id: &str) -> ChatResult<()> {
    let fields = Fields::new().value("online", false).server_timestamp("lastSeen");
    match store.update(Identity::path(id)?, fields).await {
        Ok(()) | Err(StoreError::NotFound(_)) => {
            debug!(user = id, "offline");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
