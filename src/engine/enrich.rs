use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    browser::Browser,
    eid::Eid,
    links::{LinkRecord, SummaryKind, SummaryRecord},
    storage::{self, LocalStore, KEY_API_BASE},
};

use super::{errors::EnrichError, message::SyncPayload, router::SyncRouter};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnrichRequest<'a> {
    link_id: &'a Eid,
    url: &'a str,
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct EnrichResponse {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichOutcome {
    /// No page text to work with.
    Skipped,
    /// The raw summary went out, the service had nothing to add.
    RawOnly,
    Summarized,
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct EnrichmentClient {
    http: reqwest::Client,
    store: Arc<dyn LocalStore>,
    browser: Arc<dyn Browser>,
    router: Arc<SyncRouter>,
    default_api_base: String,
    max_chars: usize,
}

impl EnrichmentClient {
    pub fn new(
        store: Arc<dyn LocalStore>,
        browser: Arc<dyn Browser>,
        router: Arc<SyncRouter>,
        default_api_base: &str,
        max_chars: usize,
        timeout: Duration,
    ) -> Result<Self, EnrichError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            store,
            browser,
            router,
            default_api_base: default_api_base.to_string(),
            max_chars,
        })
    }

    /// The persisted `apiBase` wins over the configured default.
    pub async fn api_base(&self) -> String {
        match storage::load::<String>(self.store.as_ref(), KEY_API_BASE).await {
            Ok(Some(base)) if !base.trim().is_empty() => base,
            Ok(_) => self.default_api_base.clone(),
            Err(err) => {
                log::warn!("failed to read {KEY_API_BASE}: {err}");
                self.default_api_base.clone()
            }
        }
    }

    async fn page_text(&self, link: &LinkRecord) -> Option<String> {
        if let Some(text) = &link.page_text {
            return Some(text.clone());
        }

        let tab_id = link.tab_id.as_deref()?;
        match self.browser.extract_page_text(tab_id).await {
            Ok(text) => text.filter(|t| !t.trim().is_empty()),
            Err(err) => {
                log::debug!("page text extraction from tab {tab_id} failed: {err}");
                None
            }
        }
    }

    pub async fn enrich(&self, link: &LinkRecord) -> Result<EnrichOutcome, EnrichError> {
        let Some(text) = self.page_text(link).await else {
            log::debug!("no page text for {}, skipping enrichment", link.id);
            return Ok(EnrichOutcome::Skipped);
        };

        let raw = SummaryRecord::new(link.id.clone(), SummaryKind::Raw, text.clone());
        self.router
            .route(SyncPayload::AddSummary { payload: raw })
            .await;

        let url = format!("{}/api/enrich", self.api_base().await.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&EnrichRequest {
                link_id: &link.id,
                url: &link.url,
                text: truncate_chars(&text, self.max_chars),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Status(status));
        }

        let body = response.text().await?;
        let body: EnrichResponse =
            serde_json::from_str(&body).map_err(|err| EnrichError::Malformed(err.to_string()))?;

        let Some(summary) = body.summary.filter(|s| !s.trim().is_empty()) else {
            return Ok(EnrichOutcome::RawOnly);
        };

        let mut tldr = SummaryRecord::new(link.id.clone(), SummaryKind::Tldr, summary);
        tldr.embedding = body.embeddings.and_then(|e| e.into_iter().next());
        self.router
            .route(SyncPayload::AddSummary { payload: tldr })
            .await;

        Ok(EnrichOutcome::Summarized)
    }
}
