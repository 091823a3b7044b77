use crate::store::StoreError;

pub type ChatResult<T> = Result<T, ChatError>;

/// How an error is surfaced to the person using the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connectivity trouble; the transport reconnects on its own.
    Transient,
    /// Rejected before anything went over the network.
    Validation,
    /// Another instance of the operation is still running.
    Busy,
    /// Referenced data is missing; callers degrade to placeholders.
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("invalid chat target: {0}")]
    InvalidTarget(String),
    #[error("{name} is {size} bytes, the limit is {max} bytes")]
    UploadTooLarge { name: String, size: usize, max: usize },
    #[error("{name} is not an image ({content_type})")]
    UnsupportedUpload { name: String, content_type: String },
    #[error("another upload is still in progress")]
    UploadBusy,
    #[error("image host rejected the upload: {0}")]
    ImageHost(String),
    #[error("identity provider failed: {0}")]
    Identity(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::EmptyMessage
            | ChatError::InvalidTarget(_)
            | ChatError::UploadTooLarge { .. }
            | ChatError::UnsupportedUpload { .. } => ErrorKind::Validation,
            ChatError::UploadBusy => ErrorKind::Busy,
            ChatError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            ChatError::Store(StoreError::InvalidPath(_)) => ErrorKind::Validation,
            ChatError::ImageHost(_) | ChatError::Identity(_) | ChatError::Store(_) => ErrorKind::Transient,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::ImageHost(err.to_string())
    }
}
