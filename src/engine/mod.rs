//! Capture → local store → queue → dashboard delivery pipeline.

pub mod capture;
pub mod delivery;
pub mod enrich;
pub mod errors;
pub mod message;
pub mod queue;
pub mod router;
pub mod tabs;

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    browser::{Browser, TabInfo},
    config::Config,
    links::{CapturePayload, LinkStore},
    storage::LocalStore,
};

use capture::{CaptureOutcome, CaptureProcessor};
use delivery::MessageDeliverer;
use enrich::EnrichmentClient;
use errors::CaptureError;
use message::{Inbound, InboundMessage};
use queue::{FlushReport, OutboundQueue};
use router::SyncRouter;
use tabs::TabLocator;

const TAB_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct Engine {
    config: Config,
    links: Arc<LinkStore>,
    router: Arc<SyncRouter>,
    capture: CaptureProcessor,
    tab_loaded: Notify,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Builds the pipeline and rehydrates the outbound queue from `store`.
    pub async fn new(
        config: Config,
        store: Arc<dyn LocalStore>,
        browser: Arc<dyn Browser>,
    ) -> anyhow::Result<Self> {
        let locator = TabLocator::new(browser.clone(), &config.dashboard_patterns)
            .context("invalid dashboard pattern")?;
        let deliverer =
            MessageDeliverer::new(browser.clone(), Duration::from_millis(config.inject_settle_ms));

        let queue = Arc::new(OutboundQueue::new(store.clone(), (&config).into()));
        queue.load().await.context("failed to load outbound queue")?;

        let router = Arc::new(SyncRouter::new(browser.clone(), locator, deliverer, queue));
        let enricher = Arc::new(EnrichmentClient::new(
            store.clone(),
            browser.clone(),
            router.clone(),
            &config.api_base,
            config.enrich_max_chars,
            Duration::from_secs(config.enrich_timeout_secs),
        )?);

        let links = Arc::new(LinkStore::new(store));
        let capture = CaptureProcessor::new(links.clone(), router.clone(), enricher);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            links,
            router,
            capture,
            tab_loaded: Notify::new(),
            shutdown,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn links(&self) -> &Arc<LinkStore> {
        &self.links
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        self.router.queue()
    }

    pub fn router(&self) -> &Arc<SyncRouter> {
        &self.router
    }

    /// Dispatches one inbound message. `None` means the sender expects no reply.
    pub async fn handle(&self, message: Value) -> Option<Value> {
        match Inbound::parse(message) {
            Inbound::Ping => Some(self.pong()),
            Inbound::Message(InboundMessage::SaveLink { payload }) => {
                Some(self.save_link(payload).await)
            }
            Inbound::Message(InboundMessage::ClearAllLinks) => Some(self.clear_all().await),
            Inbound::Message(InboundMessage::DataUpdated) => {
                self.router.refresh_badge().await;
                self.flush().await;
                None
            }
            Inbound::Message(InboundMessage::SrtPing) => Some(self.pong()),
            Inbound::Unknown(details) => {
                log::debug!("unknown message: {details}");
                Some(json!({
                    "success": false,
                    "error": "unknown message",
                    "details": details,
                }))
            }
        }
    }

    pub async fn capture(&self, payload: CapturePayload) -> Result<CaptureOutcome, CaptureError> {
        self.capture.process_link(payload).await
    }

    pub async fn save_link(&self, payload: CapturePayload) -> Value {
        match self.capture(payload).await {
            Ok(outcome) => json!({
                "success": true,
                "linkId": outcome.link_id,
            }),
            Err(err) => {
                match &err {
                    CaptureError::Validation(_) => log::warn!("rejected capture: {err}"),
                    CaptureError::Storage(_) => log::error!("capture failed: {err}"),
                }
                json!({
                    "success": false,
                    "error": err.kind(),
                    "details": err.to_string(),
                })
            }
        }
    }

    /// Purges links and the queue. Both removals are attempted even if the
    /// first one fails.
    pub async fn clear_all(&self) -> Value {
        let links = self.links.clear().await;
        let queue = self.queue().clear().await;
        self.router.refresh_badge().await;

        match links.and(queue) {
            Ok(()) => {
                log::info!("cleared all links and pending sync messages");
                json!({"success": true})
            }
            Err(err) => {
                log::error!("clear all failed: {err}");
                json!({"success": false, "error": err.to_string()})
            }
        }
    }

    pub fn pong(&self) -> Value {
        json!({
            "extensionId": self.config.instance_id,
            "source": "background",
            "status": "ok",
            "message": "linkdrop background is alive",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": Utc::now().timestamp_millis(),
        })
    }

    pub async fn flush(&self) -> FlushReport {
        self.router.flush().await
    }

    /// A dashboard tab finished loading; a flush follows once things settle.
    pub fn notify_tab_loaded(&self) {
        self.tab_loaded.notify_one();
    }

    /// Starts the periodic flush, the debounced tab-load flush and the tab
    /// watcher. All of them stop on [`Engine::shutdown`].
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().periodic_flush(self.shutdown.subscribe())),
            tokio::spawn(self.clone().debounced_flush(self.shutdown.subscribe())),
            tokio::spawn(self.clone().watch_tabs(self.shutdown.subscribe())),
        ]
    }

    async fn periodic_flush(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.flush_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        log::debug!("periodic flush stopped");
    }

    async fn debounced_flush(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let debounce = Duration::from_millis(self.config.tab_load_debounce_ms);

        'outer: loop {
            tokio::select! {
                _ = self.tab_loaded.notified() => {}
                _ = shutdown.changed() => break,
            }

            // wait until tab loads stop arriving for a whole debounce window
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(debounce) => break,
                    _ = self.tab_loaded.notified() => continue,
                    _ = shutdown.changed() => break 'outer,
                }
            }

            log::debug!("dashboard tab loaded, flushing");
            self.flush().await;
        }
        log::debug!("tab-load flush stopped");
    }

    async fn watch_tabs(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut seen = HashMap::new();
        let mut interval = tokio::time::interval(TAB_POLL_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let tabs = self.router.locator().locate().await;
            for tab_id in newly_loaded(&mut seen, &tabs) {
                log::debug!("dashboard tab {tab_id} finished loading");
                self.notify_tab_loaded();
            }
        }
        log::debug!("tab watcher stopped");
    }

    /// Stops background tasks and writes the queue out one last time.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        if let Err(err) = self.queue().persist().await {
            log::error!("failed to persist queue on shutdown: {err}");
        }
    }
}

/// Tabs that are complete now but were loading or unknown on the last poll.
/// Closed tabs are forgotten so reopening them counts again.
pub fn newly_loaded(seen: &mut HashMap<String, bool>, tabs: &[TabInfo]) -> Vec<String> {
    let loaded = tabs
        .iter()
        .filter(|tab| tab.complete && seen.get(&tab.id) != Some(&true))
        .map(|tab| tab.id.clone())
        .collect();

    *seen = tabs
        .iter()
        .map(|tab| (tab.id.clone(), tab.complete))
        .collect();

    loaded
}
