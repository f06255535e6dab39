use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::{
    eid::Eid,
    links::{CapturePayload, Insert, LinkRecord, LinkStore},
};

use super::{
    enrich::EnrichmentClient,
    errors::CaptureError,
    message::SyncPayload,
    router::{RouteOutcome, SyncRouter},
};

#[derive(Debug)]
pub struct CaptureOutcome {
    pub link_id: Eid,
    /// The url was already stored; nothing was written or sent.
    pub duplicate: bool,
    pub route: Option<RouteOutcome>,
    /// Background enrichment, if one was started.
    pub enrichment: Option<JoinHandle<()>>,
}

pub struct CaptureProcessor {
    links: Arc<LinkStore>,
    router: Arc<SyncRouter>,
    enricher: Arc<EnrichmentClient>,
}

impl CaptureProcessor {
    pub fn new(
        links: Arc<LinkStore>,
        router: Arc<SyncRouter>,
        enricher: Arc<EnrichmentClient>,
    ) -> Self {
        Self {
            links,
            router,
            enricher,
        }
    }

    /// Validates, dedupes and persists a capture, then pushes it towards the
    /// dashboard. Only validation and storage failures reach the caller.
    pub async fn process_link(&self, payload: CapturePayload) -> Result<CaptureOutcome, CaptureError> {
        let record = LinkRecord::from_payload(payload, Utc::now())?;

        let link_id = match self.links.insert_if_absent(&record).await? {
            Insert::Existing(id) => {
                log::info!("{} already saved as {id}", record.url);
                return Ok(CaptureOutcome {
                    link_id: id,
                    duplicate: true,
                    route: None,
                    enrichment: None,
                });
            }
            Insert::Inserted(id) => id,
        };
        log::info!("saved {} as {link_id}", record.url);

        let route = self
            .router
            .route(SyncPayload::UpsertLink {
                link: record.clone(),
                summaries: vec![],
            })
            .await;

        let enricher = self.enricher.clone();
        let enrichment = tokio::spawn(async move {
            match enricher.enrich(&record).await {
                Ok(outcome) => log::debug!("enrichment of {}: {outcome:?}", record.id),
                Err(err) => log::warn!("enrichment of {} failed: {err}", record.id),
            }
        });

        Ok(CaptureOutcome {
            link_id,
            duplicate: false,
            route: Some(route),
            enrichment: Some(enrichment),
        })
    }
}
