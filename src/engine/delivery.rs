use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use serde_json::Value;

use crate::browser::{Browser, TabInfo};

use super::errors::{BrowserError, DeliveryError};

/// Per-attempt lifecycle, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Attempting,
    InjectAndRetry,
    Delivered,
    Failed,
}

pub struct MessageDeliverer {
    browser: Arc<dyn Browser>,
    settle: Duration,
}

#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<DeliveryError>,
}

impl BroadcastReport {
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

impl MessageDeliverer {
    pub fn new(browser: Arc<dyn Browser>, settle: Duration) -> Self {
        Self { browser, settle }
    }

    fn transition(tab_id: &str, from: DeliveryState, to: DeliveryState) {
        log::debug!("delivery to tab {tab_id}: {from:?} -> {to:?}");
    }

    /// Sends one message to one tab. When no receiver is listening the
    /// receiving script is injected once and the send retried once.
    pub async fn deliver(&self, tab_id: &str, message: &Value) -> Result<Value, DeliveryError> {
        let state = DeliveryState::Attempting;

        match self.browser.send_message(tab_id, message).await {
            Ok(ack) => {
                Self::transition(tab_id, state, DeliveryState::Delivered);
                return Ok(ack);
            }
            Err(BrowserError::ContextUnavailable(_)) => {
                Self::transition(tab_id, state, DeliveryState::InjectAndRetry);
            }
            Err(cause) => {
                Self::transition(tab_id, state, DeliveryState::Failed);
                return Err(DeliveryError::Transport {
                    tab_id: tab_id.to_string(),
                    cause,
                });
            }
        }

        let state = DeliveryState::InjectAndRetry;
        if let Err(cause) = self.browser.inject_receiver(tab_id).await {
            Self::transition(tab_id, state, DeliveryState::Failed);
            return Err(DeliveryError::Injection {
                tab_id: tab_id.to_string(),
                cause,
            });
        }

        tokio::time::sleep(self.settle).await;

        match self.browser.send_message(tab_id, message).await {
            Ok(ack) => {
                Self::transition(tab_id, state, DeliveryState::Delivered);
                Ok(ack)
            }
            Err(cause) => {
                Self::transition(tab_id, state, DeliveryState::Failed);
                Err(DeliveryError::AfterInjection {
                    tab_id: tab_id.to_string(),
                    cause,
                })
            }
        }
    }

    /// Delivers to every tab concurrently; one slow or failing tab never
    /// holds back the others.
    pub async fn broadcast(&self, tabs: &[TabInfo], message: &Value) -> BroadcastReport {
        let attempts = tabs.iter().map(|tab| async move {
            (tab.id.clone(), self.deliver(&tab.id, message).await)
        });

        let mut report = BroadcastReport::default();
        for (tab_id, result) in join_all(attempts).await {
            match result {
                Ok(_) => report.delivered.push(tab_id),
                Err(err) => {
                    log::warn!("{err}");
                    report.failed.push(err);
                }
            }
        }

        report
    }
}
