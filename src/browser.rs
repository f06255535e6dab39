//! Seam between the sync engine and whatever hosts the dashboard tabs.
//!
//! Every method maps onto one extension platform call (`tabs.query`,
//! `tabs.sendMessage`, `scripting.executeScript`, `action.setBadgeText`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::errors::BrowserError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: String,
    pub url: String,
    /// The page finished loading.
    pub complete: bool,
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, BrowserError>;

    /// Sends `message` to the receiving script in `tab_id` and returns its ack.
    /// Must report [`BrowserError::ContextUnavailable`] when nothing listens.
    async fn send_message(&self, tab_id: &str, message: &Value) -> Result<Value, BrowserError>;

    async fn inject_receiver(&self, tab_id: &str) -> Result<(), BrowserError>;

    /// Best-effort `document.body.innerText` of a tab.
    async fn extract_page_text(&self, tab_id: &str) -> Result<Option<String>, BrowserError>;

    async fn set_badge(&self, text: &str) -> Result<(), BrowserError>;
}

/// A host with no tabs at all. Every sync message ends up queued.
#[derive(Debug, Default, Clone)]
pub struct DetachedBrowser;

#[async_trait]
impl Browser for DetachedBrowser {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, BrowserError> {
        Ok(vec![])
    }

    async fn send_message(&self, tab_id: &str, _message: &Value) -> Result<Value, BrowserError> {
        Err(BrowserError::ContextUnavailable(tab_id.to_string()))
    }

    async fn inject_receiver(&self, tab_id: &str) -> Result<(), BrowserError> {
        Err(BrowserError::Other(format!("no such tab {tab_id}")))
    }

    async fn extract_page_text(&self, _tab_id: &str) -> Result<Option<String>, BrowserError> {
        Ok(None)
    }

    async fn set_badge(&self, text: &str) -> Result<(), BrowserError> {
        log::debug!("badge: {text:?}");
        Ok(())
    }
}
