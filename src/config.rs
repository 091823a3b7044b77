//! Process configuration read from the environment (and `.env`).

use std::{path::PathBuf, str::FromStr};

use anyhow::Context;

use crate::chat::ChatConfig;

pub const ASSISTANT_ID: &str = "assistant";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Where browsers reach the server; OAuth redirects are built from it.
    pub public_url: String,
    pub app_name: String,
    pub client_secrets: PathBuf,
    pub image_host_url: String,
    pub image_host_key: String,
    pub assistant_enabled: bool,
    pub session_minutes: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        Ok(Config {
            database_url: var("DATABASE_URL", "sqlite://worldchat.db?mode=rwc"),
            bind_addr: var("BIND_ADDR", "0.0.0.0:8080"),
            public_url: var("PUBLIC_URL", "http://localhost:8080").trim_end_matches('/').to_owned(),
            app_name: var("APP_NAME", "World Chat"),
            client_secrets: PathBuf::from(var("CLIENT_SECRETS", "client_secret.json")),
            image_host_url: var("IMAGE_HOST_URL", "https://api.imgbb.com/1/upload"),
            image_host_key: var("IMAGE_HOST_KEY", ""),
            assistant_enabled: parse(&lookup, "ASSISTANT_ENABLED", true)?,
            session_minutes: parse(&lookup, "SESSION_MINUTES", 60)?,
        })
    }

    pub fn secure_cookies(&self) -> bool {
        self.public_url.starts_with("https://")
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            app_name: self.app_name.clone(),
            assistant_id: self.assistant_enabled.then(|| ASSISTANT_ID.to_owned()),
            ..ChatConfig::default()
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{key}={raw:?} is not valid")),
        None => Ok(default),
    }
}
