use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore as SessionStore, SessionManagerLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;
use worldchat::{
    auth, config::Config, index, res, rooms,
    store::{MemoryStore, SqlitePersistence},
    upload::HttpImageHost,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("worldchat=info,tower_http=info")),
        )
        .init();

    let config = Arc::new(Config::from_env()?);

    let session_store = SessionStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(config.secure_cookies())
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_minutes)));

    let persistence = SqlitePersistence::connect(&config.database_url).await?;
    let store = MemoryStore::with_persistence(persistence).await?;

    let secrets = tokio::fs::read_to_string(&config.client_secrets)
        .await
        .with_context(|| format!("reading {}", config.client_secrets.display()))?;
    let clients = auth::Clients::from_json(serde_json::from_str(&secrets)?, &config.public_url).map_err(|err| err.0)?;

    let image_host = HttpImageHost::new(config.image_host_url.clone(), config.image_host_key.clone());
    let app_state = AppState {
        store: Arc::new(store),
        clients,
        config: config.clone(),
        image_host: Arc::new(image_host),
    };

    let app = Router::new()
        .route("/", get(index::index))
        .route("/static/avatar.svg", get(res::avatar))

        .merge(auth::router())
        .merge(rooms::router())

        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "could not listen for shutdown");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
