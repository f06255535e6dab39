#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("io error on key {key}: {source:?}")]
    IO {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed value under key {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by the browser host.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    /// No receiving script is listening in the destination context.
    #[error("context unavailable in tab {0}")]
    ContextUnavailable(String),

    #[error("browser error: {0}")]
    Other(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("tab {tab_id} unreachable after injection: {cause}")]
    AfterInjection { tab_id: String, cause: BrowserError },

    #[error("script injection into tab {tab_id} failed: {cause}")]
    Injection { tab_id: String, cause: BrowserError },

    #[error("delivery to tab {tab_id} failed: {cause}")]
    Transport { tab_id: String, cause: BrowserError },
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CaptureError {
    /// Short machine-readable name used in the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::Validation(_) => "ValidationError",
            CaptureError::Storage(_) => "StorageError",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("outbound queue is full ({0} messages)")]
    Full(usize),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(thiserror::Error, Debug)]
pub enum EnrichError {
    #[error("reqwest error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("enrichment endpoint answered {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed enrichment response: {0}")]
    Malformed(String),
}
