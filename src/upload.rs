use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{debug, info};

use crate::{
    GetField,
    error::{ChatError, ChatResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
}

impl MediaKind {
    pub fn of(content_type: &str) -> Option<Self> {
        content_type.starts_with("image/").then_some(MediaKind::Image)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub max_bytes: usize,
    pub allowed_kinds: HashSet<MediaKind>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { max_bytes: 5_242_880, allowed_kinds: HashSet::from([MediaKind::Image]) }
    }
}

#[derive(Debug, Clone)]
pub struct ImageFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Returns a publicly fetchable URL for the stored file.
    async fn upload(&self, file: &ImageFile) -> ChatResult<String>;
}

/// Validates files against [`UploadConfig`] and lets one upload run at a time.
pub struct Uploader {
    host: Arc<dyn ImageHost>,
    config: UploadConfig,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Uploader {
    pub fn new(host: Arc<dyn ImageHost>, config: UploadConfig) -> Self {
        Self { host, config, in_flight: AtomicBool::new(false) }
    }

    pub fn validate(&self, file: &ImageFile) -> ChatResult<()> {
        let allowed = MediaKind::of(&file.content_type).is_some_and(|k| self.config.allowed_kinds.contains(&k));
        if !allowed || file.bytes.is_empty() {
            return Err(ChatError::UnsupportedUpload {
                name: file.name.clone(),
                content_type: file.content_type.clone(),
            });
        }
        if file.bytes.len() > self.config.max_bytes {
            return Err(ChatError::UploadTooLarge {
                name: file.name.clone(),
                size: file.bytes.len(),
                max: self.config.max_bytes,
            });
        }
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Validates `file` and claims the single upload slot. Fails with
    /// [`ChatError::UploadBusy`] instead of queueing behind a running upload.
    pub fn begin<'a>(&'a self, file: &'a ImageFile) -> ChatResult<PendingUpload<'a>> {
        self.validate(file)?;
        if self.in_flight.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(ChatError::UploadBusy);
        }
        Ok(PendingUpload { host: self.host.as_ref(), file, _slot: InFlight(&self.in_flight) })
    }

    pub async fn upload(&self, file: &ImageFile) -> ChatResult<String> {
        self.begin(file)?.send().await
    }
}

/// An accepted file holding the upload slot until it is sent or dropped.
pub struct PendingUpload<'a> {
    host: &'a dyn ImageHost,
    file: &'a ImageFile,
    _slot: InFlight<'a>,
}

impl PendingUpload<'_> {
    pub async fn send(self) -> ChatResult<String> {
        let file = self.file;
        debug!(name = %file.name, size = file.bytes.len(), "uploading image");
        let url = self.host.upload(file).await?;
        info!(name = %file.name, %url, "image uploaded");
        Ok(url)
    }
}

/// imgbb-compatible host: base64 form upload, URL under `data.url`.
pub struct HttpImageHost {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpImageHost {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self { http_client: reqwest::Client::new(), endpoint, api_key }
    }
}

#[async_trait]
impl ImageHost for HttpImageHost {
    async fn upload(&self, file: &ImageFile) -> ChatResult<String> {
        let body: serde_json::Value = self
            .http_client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .form(&[("image", STANDARD.encode(&file.bytes)), ("name", file.name.clone())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.get_obj_field("data")
            .and_then(|data| data.get_str_field("url"))
            .map_err(|err| ChatError::ImageHost(err.0.to_string()))
    }
}
