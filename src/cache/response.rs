use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::store::KeyValueBlobStore;
use crate::error::StorageError;

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    stored_at: DateTime<Utc>,
    size: usize,
}

/// On-disk response cache keyed by the exact request URL.
///
/// Each entry is `<sha256(url)>.body` plus a `.json` sidecar recording the
/// URL, so a lookup only matches the identical URL string.
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        (
            self.dir.join(format!("{}.body", digest)),
            self.dir.join(format!("{}.json", digest)),
        )
    }

    /// Number of cached responses.
    pub async fn len(&self) -> Result<usize, StorageError> {
        let mut count = 0;
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl KeyValueBlobStore for ResponseCache {
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let (body_path, meta_path) = self.paths(url);

        let meta = match fs::read(&meta_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: EntryMeta = serde_json::from_slice(&meta)?;
        if meta.url != url {
            return Ok(None);
        }

        match fs::read(&body_path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, url: &str, value: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        let (body_path, meta_path) = self.paths(url);

        fs::write(&body_path, value).await?;
        let meta = EntryMeta {
            url: url.to_string(),
            stored_at: Utc::now(),
            size: value.len(),
        };
        fs::write(&meta_path, serde_json::to_vec(&meta)?).await?;
        Ok(())
    }

    async fn remove(&self, url: &str) -> Result<(), StorageError> {
        let (body_path, meta_path) = self.paths(url);
        for path in [meta_path, body_path] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
