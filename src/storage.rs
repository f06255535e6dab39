use std::{collections::HashMap, path::PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{eid::Eid, engine::errors::StorageError};

pub const KEY_LINKS: &str = "links";
pub const KEY_PENDING_UPSERTS: &str = "pendingUpserts";
pub const KEY_API_BASE: &str = "apiBase";

/// Durable key-value persistence. Each call is atomic for its key; there is
/// no locking across calls.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub async fn load<T>(store: &dyn LocalStore, key: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StorageError::Malformed {
                key: key.to_string(),
                source,
            }),
    }
}

pub async fn save<T>(store: &dyn LocalStore, key: &str, data: &T) -> Result<(), StorageError>
where
    T: Serialize,
{
    let value = serde_json::to_value(data).map_err(|source| StorageError::Malformed {
        key: key.to_string(),
        source,
    })?;
    store.set(key, value).await
}

/// One JSON file per key inside `base_dir`.
#[derive(Clone, Debug)]
pub struct FileStore {
    pub base_dir: PathBuf,
}

impl FileStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = storage_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(FileStore { base_dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }

    fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |source| StorageError::IO {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl LocalStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let data = match tokio::fs::read(self.path(key)).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_err(key)(err)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StorageError::Malformed {
                key: key.to_string(),
                source,
            })
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let data = serde_json::to_vec(&value).map_err(|source| StorageError::Malformed {
            key: key.to_string(),
            source,
        })?;

        // write-then-rename so readers never observe a half-written file
        let temp_path = self.base_dir.join(format!("{}-{key}.tmp", Eid::new()));
        tokio::fs::write(&temp_path, data)
            .await
            .map_err(Self::io_err(key))?;
        tokio::fs::rename(&temp_path, self.path(key))
            .await
            .map_err(Self::io_err(key))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_err(key)(err)),
        }
    }
}

/// In-memory store; state is lost with the process.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}
