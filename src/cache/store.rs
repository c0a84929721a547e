use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use crate::error::StorageError;

/// String-keyed blob storage, queried by exact key. Every offline cache
/// tier is one of these.
#[async_trait]
pub trait KeyValueBlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Insert or overwrite.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// The persisted client-side database: a `handles` tree for granted folder
/// paths and a `files` tree for cached audio.
pub struct OfflineDatabase {
    db: sled::Db,
}

impl OfflineDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        info!("Opening offline database at {}", path.display());
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn handles(&self) -> Result<SledBlobStore, StorageError> {
        self.tree("handles")
    }

    pub fn files(&self) -> Result<SledBlobStore, StorageError> {
        self.tree("files")
    }

    fn tree(&self, name: &str) -> Result<SledBlobStore, StorageError> {
        Ok(SledBlobStore {
            tree: self.db.open_tree(name)?,
        })
    }
}

/// One sled tree.
#[derive(Clone)]
pub struct SledBlobStore {
    tree: sled::Tree,
}

impl SledBlobStore {
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[async_trait]
impl KeyValueBlobStore for SledBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.tree.insert(key, value)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.tree.remove(key)?;
        self.tree.flush_async().await?;
        Ok(())
    }
}

/// Non-persistent store, for tests and cache-less runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StorageError {
        StorageError::Store("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl KeyValueBlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| Self::poisoned())?;
        entries.remove(key);
        Ok(())
    }
}
