//! Dashboard tabs living in a Chrome reachable over the DevTools protocol.
//!
//! headless_chrome is blocking, so every call hops onto the blocking pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use headless_chrome::Tab;
use serde_json::Value;

use crate::{
    browser::{Browser, TabInfo},
    engine::errors::BrowserError,
};

/// Installed into a dashboard tab when no receiver answers. Hands every sync
/// message to the page through `window.postMessage`.
const RECEIVER_SCRIPT: &str = r#"
(() => {
    if (typeof window.__linkdropReceive === 'function') {
        return 'present';
    }
    window.__linkdropReceive = (message) => {
        window.postMessage({ source: 'linkdrop', ...message }, window.location.origin);
        return { received: true, type: message.type };
    };
    return 'installed';
})()
"#;

const NO_RECEIVER: &str = "__linkdrop_no_receiver";

fn other<E: std::fmt::Display>(err: E) -> BrowserError {
    BrowserError::Other(err.to_string())
}

#[derive(Clone)]
pub struct ChromeBrowser {
    browser: headless_chrome::Browser,
    badge: Arc<Mutex<String>>,
}

impl ChromeBrowser {
    pub fn connect(ws_url: &str) -> anyhow::Result<Self> {
        let browser = headless_chrome::Browser::connect(ws_url.to_string())?;
        log::info!("attached to chrome at {ws_url}");

        Ok(Self {
            browser,
            badge: Arc::new(Mutex::new(String::new())),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, BrowserError>
    where
        T: Send + 'static,
        F: FnOnce(headless_chrome::Browser) -> Result<T, BrowserError> + Send + 'static,
    {
        let browser = self.browser.clone();
        tokio::task::spawn_blocking(move || f(browser))
            .await
            .map_err(other)?
    }
}

fn find_tab(browser: &headless_chrome::Browser, tab_id: &str) -> Result<Arc<Tab>, BrowserError> {
    let tabs = browser.get_tabs().lock().map_err(other)?;
    tabs.iter()
        .find(|tab| tab.get_target_id() == tab_id)
        .cloned()
        .ok_or_else(|| BrowserError::Other(format!("no such tab {tab_id}")))
}

fn eval_string(tab: &Tab, expression: &str) -> Result<Option<String>, BrowserError> {
    let result = tab.evaluate(expression, true).map_err(other)?;
    Ok(result
        .value
        .and_then(|value| value.as_str().map(|s| s.to_string())))
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, BrowserError> {
        self.blocking(|browser| {
            browser.register_missing_tabs();

            let tabs = browser.get_tabs().lock().map_err(other)?.clone();
            Ok(tabs
                .iter()
                .map(|tab| {
                    let ready = eval_string(tab, "document.readyState").unwrap_or(None);
                    TabInfo {
                        id: tab.get_target_id().to_string(),
                        url: tab.get_url(),
                        complete: ready.as_deref() == Some("complete"),
                    }
                })
                .collect())
        })
        .await
    }

    async fn send_message(&self, tab_id: &str, message: &Value) -> Result<Value, BrowserError> {
        let tab_id = tab_id.to_string();
        let expression = format!(
            r#"(async () => {{
                const receive = window.__linkdropReceive;
                if (typeof receive !== 'function') {{
                    return JSON.stringify('{NO_RECEIVER}');
                }}
                const ack = await receive({message});
                return JSON.stringify(ack === undefined ? null : ack);
            }})()"#
        );

        self.blocking(move |browser| {
            let tab = find_tab(&browser, &tab_id)?;
            let raw = eval_string(&tab, &expression)?.unwrap_or_else(|| "null".to_string());
            let ack: Value = serde_json::from_str(&raw).map_err(other)?;

            if ack.as_str() == Some(NO_RECEIVER) {
                return Err(BrowserError::ContextUnavailable(tab_id));
            }
            Ok(ack)
        })
        .await
    }

    async fn inject_receiver(&self, tab_id: &str) -> Result<(), BrowserError> {
        let tab_id = tab_id.to_string();
        self.blocking(move |browser| {
            let tab = find_tab(&browser, &tab_id)?;
            let state = eval_string(&tab, RECEIVER_SCRIPT)?;
            log::debug!("receiver in tab {tab_id}: {state:?}");
            Ok(())
        })
        .await
    }

    async fn extract_page_text(&self, tab_id: &str) -> Result<Option<String>, BrowserError> {
        let tab_id = tab_id.to_string();
        self.blocking(move |browser| {
            let tab = find_tab(&browser, &tab_id)?;
            eval_string(&tab, "document.body ? document.body.innerText : ''")
        })
        .await
    }

    async fn set_badge(&self, text: &str) -> Result<(), BrowserError> {
        // CDP has no toolbar badge; surface changes in the log instead
        let mut badge = self.badge.lock().map_err(other)?;
        if *badge != text {
            log::info!("pending sync badge: {text:?}");
            *badge = text.to_string();
        }
        Ok(())
    }
}
