use std::sync::Arc;

use crate::browser::Browser;

use super::{
    delivery::MessageDeliverer,
    message::SyncPayload,
    queue::{FlushReport, OutboundQueue},
    tabs::TabLocator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Reached this many dashboard tabs.
    Delivered(usize),
    Queued,
    /// Undeliverable and the queue refused it.
    Lost,
}

/// Immediate delivery with fallback to the outbound queue.
pub struct SyncRouter {
    browser: Arc<dyn Browser>,
    locator: TabLocator,
    deliverer: MessageDeliverer,
    queue: Arc<OutboundQueue>,
}

impl SyncRouter {
    pub fn new(
        browser: Arc<dyn Browser>,
        locator: TabLocator,
        deliverer: MessageDeliverer,
        queue: Arc<OutboundQueue>,
    ) -> Self {
        Self {
            browser,
            locator,
            deliverer,
            queue,
        }
    }

    pub fn locator(&self) -> &TabLocator {
        &self.locator
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    pub async fn route(&self, payload: SyncPayload) -> RouteOutcome {
        let tabs = self.locator.locate().await;

        let outcome = if tabs.is_empty() {
            log::debug!("no dashboard tab for {}, queueing", payload.kind());
            self.enqueue(payload).await
        } else {
            let wire = match payload.to_wire() {
                Ok(wire) => wire,
                Err(err) => {
                    log::error!("cannot encode {}: {err}", payload.kind());
                    return RouteOutcome::Lost;
                }
            };
            let report = self.deliverer.broadcast(&tabs, &wire).await;
            if report.any_delivered() {
                RouteOutcome::Delivered(report.delivered.len())
            } else {
                log::info!(
                    "{} reached none of {} dashboard tabs, queueing",
                    payload.kind(),
                    tabs.len()
                );
                self.enqueue(payload).await
            }
        };

        self.refresh_badge().await;
        outcome
    }

    async fn enqueue(&self, payload: SyncPayload) -> RouteOutcome {
        match self.queue.enqueue(payload).await {
            Ok(()) => RouteOutcome::Queued,
            Err(err) => {
                log::error!("failed to queue sync message: {err}");
                RouteOutcome::Lost
            }
        }
    }

    pub async fn flush(&self) -> FlushReport {
        let report = self.queue.flush(&self.locator, &self.deliverer).await;
        if report.attempted > 0 {
            self.refresh_badge().await;
        }
        report
    }

    /// Pending count on the badge, `!` once anything was dropped.
    pub async fn refresh_badge(&self) {
        let text = if self.queue.dropped().await > 0 {
            "!".to_string()
        } else {
            match self.queue.len().await {
                0 => String::new(),
                n => n.to_string(),
            }
        };

        if let Err(err) = self.browser.set_badge(&text).await {
            log::debug!("badge refresh failed: {err}");
        }
    }
}
