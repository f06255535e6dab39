use std::{collections::BTreeSet, fmt::Display, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    eid::Eid,
    engine::errors::{CaptureError, StorageError},
    storage::{self, LocalStore, KEY_LINKS},
};

pub const DEFAULT_LABEL: &str = "research";

/// Oldest entries beyond this are discarded from the `links` collection.
pub const MAX_STORED_LINKS: usize = 1000;

/// Dedupe key: trailing slashes stripped, lowercased.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

/// Raw capture event as handed over by a page or the popup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePayload {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub structured_data: Option<Value>,

    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub board_id: Option<String>,

    #[serde(default, deserialize_with = "string_or_number")]
    pub tab_id: Option<String>,
    #[serde(default)]
    pub page_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkMetadata {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority {other:?}")),
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSource {
    #[default]
    Extension,
}

/// Canonical persisted representation of a saved page.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    pub id: Eid,
    pub url: String,
    pub metadata: LinkMetadata,
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: LinkStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default)]
    pub source: LinkSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_text: Option<String>,
}

impl LinkRecord {
    /// Builds a fresh record. Fails when the payload carries no url.
    pub fn from_payload(payload: CapturePayload, now: DateTime<Utc>) -> Result<Self, CaptureError> {
        let url = payload
            .url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| CaptureError::Validation("url is required".to_string()))?;

        let labels: BTreeSet<String> = payload
            .label
            .iter()
            .flat_map(|label| label.split(','))
            .map(|label| label.trim().to_lowercase())
            .filter(|label| !label.is_empty())
            .collect();
        let labels = if labels.is_empty() {
            BTreeSet::from([DEFAULT_LABEL.to_string()])
        } else {
            labels
        };

        let priority = match payload.priority.as_deref() {
            None => Priority::default(),
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                log::warn!("{err}, falling back to {}", Priority::default());
                Priority::default()
            }),
        };

        let title = payload
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| url.clone());

        Ok(LinkRecord {
            id: Eid::new(),
            url,
            metadata: LinkMetadata {
                title,
                description: payload.description.unwrap_or_default(),
                image: payload.image,
                author: payload.author,
                published_time: payload.published_time,
                modified_time: payload.modified_time,
                site_name: payload.site_name,
                keywords: payload.keywords,
                structured_data: payload.structured_data,
            },
            labels,
            priority,
            status: LinkStatus::Active,
            created_at: now,
            updated_at: now,
            board_id: payload.board_id.filter(|b| !b.is_empty()),
            source: LinkSource::Extension,
            tab_id: payload.tab_id,
            page_text: payload.page_text.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn normalized_url(&self) -> String {
        normalize_url(&self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryKind {
    Raw,
    Tldr,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub id: Eid,
    pub link_id: Eid,
    pub kind: SummaryKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SummaryRecord {
    pub fn new(link_id: Eid, kind: SummaryKind, content: String) -> Self {
        let now = Utc::now();
        SummaryRecord {
            id: Eid::new(),
            link_id,
            kind,
            content,
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert {
    Inserted(Eid),
    /// A record with the same normalized url was already stored.
    Existing(Eid),
}

impl Insert {
    pub fn id(&self) -> &Eid {
        match self {
            Insert::Inserted(id) | Insert::Existing(id) => id,
        }
    }
}

/// The `links` collection. All read-modify-write sequences go through one
/// mutex so concurrent captures of the same url cannot both insert.
pub struct LinkStore {
    store: Arc<dyn LocalStore>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl LinkStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self::with_capacity(store, MAX_STORED_LINKS)
    }

    pub fn with_capacity(store: Arc<dyn LocalStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn all(&self) -> Result<Vec<LinkRecord>, StorageError> {
        Ok(storage::load(self.store.as_ref(), KEY_LINKS)
            .await?
            .unwrap_or_default())
    }

    pub async fn insert_if_absent(&self, record: &LinkRecord) -> Result<Insert, StorageError> {
        let _guard = self.write_lock.lock().await;

        let mut links = self.all().await?;
        let key = record.normalized_url();
        if let Some(existing) = links.iter().find(|link| link.normalized_url() == key) {
            log::debug!("{} already stored as {}", record.url, existing.id);
            return Ok(Insert::Existing(existing.id.clone()));
        }

        links.insert(0, record.clone());
        links.truncate(self.capacity);
        storage::save(self.store.as_ref(), KEY_LINKS, &links).await?;

        Ok(Insert::Inserted(record.id.clone()))
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(KEY_LINKS).await
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(s) => s
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        Raw::Many(list) => list,
        Raw::Nothing(()) => vec![],
    })
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn payload(url: &str) -> CapturePayload {
        CapturePayload {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://a.com/"), "https://a.com");
        assert_eq!(normalize_url("https://a.com"), "https://a.com");
        assert_eq!(normalize_url("HTTPS://A.com/Foo//"), "https://a.com/foo");
    }

    #[test]
    fn test_from_payload_defaults() {
        let record = LinkRecord::from_payload(payload("https://x.com/foo"), Utc::now()).unwrap();

        assert_eq!(record.labels, BTreeSet::from(["research".to_string()]));
        assert_eq!(record.priority, Priority::Medium);
        assert_eq!(record.status, LinkStatus::Active);
        assert_eq!(record.source, LinkSource::Extension);
        assert_eq!(record.metadata.title, "https://x.com/foo");
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_from_payload_requires_url() {
        let missing = LinkRecord::from_payload(CapturePayload::default(), Utc::now());
        assert!(matches!(missing, Err(CaptureError::Validation(_))));

        let blank = LinkRecord::from_payload(payload("   "), Utc::now());
        assert!(matches!(blank, Err(CaptureError::Validation(_))));
    }

    #[test]
    fn test_from_payload_label_and_priority() {
        let p = CapturePayload {
            label: Some("Reading, Later".to_string()),
            priority: Some("HIGH".to_string()),
            board_id: Some("b1".to_string()),
            ..payload("https://x.com")
        };
        let record = LinkRecord::from_payload(p, Utc::now()).unwrap();

        assert_eq!(
            record.labels,
            BTreeSet::from(["reading".to_string(), "later".to_string()])
        );
        assert_eq!(record.priority, Priority::High);
        assert_eq!(record.board_id.as_deref(), Some("b1"));
    }

    #[test]
    fn test_unknown_priority_falls_back() {
        let p = CapturePayload {
            priority: Some("urgent".to_string()),
            ..payload("https://x.com")
        };
        let record = LinkRecord::from_payload(p, Utc::now()).unwrap();
        assert_eq!(record.priority, Priority::Medium);
    }

    #[test]
    fn test_payload_wire_shape() {
        let p: CapturePayload = serde_json::from_value(json!({
            "url": "https://x.com",
            "siteName": "X",
            "keywords": "a, b,,c",
            "tabId": 42,
            "pageText": "hello"
        }))
        .unwrap();

        assert_eq!(p.site_name.as_deref(), Some("X"));
        assert_eq!(p.keywords, vec!["a", "b", "c"]);
        assert_eq!(p.tab_id.as_deref(), Some("42"));
        assert_eq!(p.page_text.as_deref(), Some("hello"));

        let p: CapturePayload =
            serde_json::from_value(json!({"url": "https://x.com", "keywords": ["k"], "tabId": null}))
                .unwrap();
        assert_eq!(p.keywords, vec!["k"]);
        assert!(p.tab_id.is_none());
    }

    #[tokio::test]
    async fn test_insert_if_absent_dedupes() {
        let links = LinkStore::new(Arc::new(MemoryStore::new()));

        let first = LinkRecord::from_payload(payload("https://a.com/"), Utc::now()).unwrap();
        let second = LinkRecord::from_payload(payload("https://A.com"), Utc::now()).unwrap();

        let a = links.insert_if_absent(&first).await.unwrap();
        let b = links.insert_if_absent(&second).await.unwrap();

        assert_eq!(a, Insert::Inserted(first.id.clone()));
        assert_eq!(b, Insert::Existing(first.id.clone()));
        assert_eq!(links.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_of_same_url() {
        let links = Arc::new(LinkStore::new(Arc::new(MemoryStore::new())));

        let mut handles = vec![];
        for i in 0..8 {
            let links = links.clone();
            let url = if i % 2 == 0 { "https://race.dev/" } else { "https://race.dev" };
            let record = LinkRecord::from_payload(payload(url), Utc::now()).unwrap();
            handles.push(tokio::spawn(async move {
                links.insert_if_absent(&record).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(links.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_collection_is_capped_newest_first() {
        let links = LinkStore::with_capacity(Arc::new(MemoryStore::new()), 10);

        for i in 0..15 {
            let record =
                LinkRecord::from_payload(payload(&format!("https://x.com/{i}")), Utc::now())
                    .unwrap();
            links.insert_if_absent(&record).await.unwrap();
        }

        let all = links.all().await.unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all[0].url, "https://x.com/14");
        assert_eq!(all[9].url, "https://x.com/5");
    }

    #[tokio::test]
    async fn test_clear() {
        let links = LinkStore::new(Arc::new(MemoryStore::new()));
        let record = LinkRecord::from_payload(payload("https://x.com"), Utc::now()).unwrap();
        links.insert_if_absent(&record).await.unwrap();

        links.clear().await.unwrap();
        assert!(links.all().await.unwrap().is_empty());
        assert_eq!(
            links.insert_if_absent(&record).await.unwrap(),
            Insert::Inserted(record.id.clone())
        );
    }
}
