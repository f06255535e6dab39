use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    browser::{Browser, TabInfo},
    config::Config,
    engine::{errors::BrowserError, Engine},
    storage::{LocalStore, MemoryStore},
};

mod web;

#[derive(Default)]
struct FakeState {
    tabs: Vec<TabInfo>,
    receivers: HashSet<String>,
    broken: HashSet<String>,
    inert_injection: HashSet<String>,
    page_texts: HashMap<String, String>,
    sends: HashMap<String, usize>,
    injections: HashMap<String, usize>,
    delivered: Vec<(String, Value)>,
    badges: Vec<String>,
    fail_queries: bool,
}

/// Scriptable stand-in for the browser hosting the dashboard.
#[derive(Default)]
pub struct FakeBrowser {
    state: Mutex<FakeState>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// A loaded tab whose receiving script is already running.
    pub fn open_tab(&self, id: &str, url: &str) {
        self.open_tab_without_receiver(id, url);
        self.state().receivers.insert(id.to_string());
    }

    pub fn open_tab_without_receiver(&self, id: &str, url: &str) {
        let mut state = self.state();
        state.tabs.retain(|t| t.id != id);
        state.tabs.push(TabInfo {
            id: id.to_string(),
            url: url.to_string(),
            complete: true,
        });
    }

    pub fn open_loading_tab(&self, id: &str, url: &str) {
        let mut state = self.state();
        state.tabs.retain(|t| t.id != id);
        state.tabs.push(TabInfo {
            id: id.to_string(),
            url: url.to_string(),
            complete: false,
        });
    }

    pub fn finish_loading(&self, id: &str) {
        let mut state = self.state();
        if let Some(tab) = state.tabs.iter_mut().find(|t| t.id == id) {
            tab.complete = true;
        }
        state.receivers.insert(id.to_string());
    }

    pub fn close_tab(&self, id: &str) {
        let mut state = self.state();
        state.tabs.retain(|t| t.id != id);
        state.receivers.remove(id);
    }

    /// Every send to this tab fails with a non-recoverable error.
    pub fn break_tab(&self, id: &str) {
        self.state().broken.insert(id.to_string());
    }

    pub fn repair_tab(&self, id: &str) {
        self.state().broken.remove(id);
    }

    /// Injection reports success but no receiver ever comes up.
    pub fn make_injection_inert(&self, id: &str) {
        self.state().inert_injection.insert(id.to_string());
    }

    pub fn set_page_text(&self, id: &str, text: &str) {
        self.state()
            .page_texts
            .insert(id.to_string(), text.to_string());
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state().fail_queries = fail;
    }

    pub fn sends(&self, id: &str) -> usize {
        self.state().sends.get(id).copied().unwrap_or(0)
    }

    pub fn injections(&self, id: &str) -> usize {
        self.state().injections.get(id).copied().unwrap_or(0)
    }

    pub fn delivered(&self) -> Vec<(String, Value)> {
        self.state().delivered.clone()
    }

    pub fn delivered_types(&self, id: &str) -> Vec<String> {
        self.state()
            .delivered
            .iter()
            .filter(|(tab, _)| tab == id)
            .map(|(_, msg)| msg["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn badges(&self) -> Vec<String> {
        self.state().badges.clone()
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, BrowserError> {
        let state = self.state();
        if state.fail_queries {
            return Err(BrowserError::Other("tabs api unavailable".to_string()));
        }
        Ok(state.tabs.clone())
    }

    async fn send_message(&self, tab_id: &str, message: &Value) -> Result<Value, BrowserError> {
        let mut state = self.state();
        *state.sends.entry(tab_id.to_string()).or_default() += 1;

        if state.broken.contains(tab_id) {
            return Err(BrowserError::Other("message port closed".to_string()));
        }
        if !state.receivers.contains(tab_id) {
            return Err(BrowserError::ContextUnavailable(tab_id.to_string()));
        }

        state.delivered.push((tab_id.to_string(), message.clone()));
        Ok(json!({"ok": true}))
    }

    async fn inject_receiver(&self, tab_id: &str) -> Result<(), BrowserError> {
        let mut state = self.state();
        *state.injections.entry(tab_id.to_string()).or_default() += 1;

        if !state.tabs.iter().any(|t| t.id == tab_id) {
            return Err(BrowserError::Other(format!("no tab {tab_id}")));
        }
        if !state.inert_injection.contains(tab_id) {
            state.receivers.insert(tab_id.to_string());
        }
        Ok(())
    }

    async fn extract_page_text(&self, tab_id: &str) -> Result<Option<String>, BrowserError> {
        Ok(self.state().page_texts.get(tab_id).cloned())
    }

    async fn set_badge(&self, text: &str) -> Result<(), BrowserError> {
        self.state().badges.push(text.to_string());
        Ok(())
    }
}

/// Config tuned for tests: enrichment points at a closed port unless overridden.
pub fn test_config() -> Config {
    Config {
        api_base: "http://127.0.0.1:9".to_string(),
        dashboard_patterns: vec![
            "http://localhost:3000/*".to_string(),
            "https://app.linkdrop.dev/*".to_string(),
        ],
        enrich_timeout_secs: 2,
        ..Default::default()
    }
}

pub const DASHBOARD_URL: &str = "http://localhost:3000/dashboard";

pub struct Harness {
    pub engine: Arc<Engine>,
    pub browser: Arc<FakeBrowser>,
    pub store: Arc<MemoryStore>,
}

pub async fn harness_with(config: Config) -> Harness {
    let browser = Arc::new(FakeBrowser::new());
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(config, store.clone(), browser.clone())
        .await
        .expect("failed to build engine");

    Harness {
        engine: Arc::new(engine),
        browser,
        store,
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

impl Harness {
    pub async fn stored(&self, key: &str) -> Option<Value> {
        self.store.get(key).await.unwrap()
    }

    pub async fn link_count(&self) -> usize {
        self.engine.links().all().await.unwrap().len()
    }

    pub async fn queue_len(&self) -> usize {
        self.engine.queue().len().await
    }
}

/// Polls `check` until it holds; used where work runs on spawned tasks.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
