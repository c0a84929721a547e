use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::fetch::AudioFetcher;
use super::folder::{FolderPicker, LocalFolderAccess, UserGesture};
use super::location::file_name_of;
use super::store::KeyValueBlobStore;
use crate::error::StorageError;

/// Lookup tiers, in the order [`OfflineAudioCache::resolve`] tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheTier {
    /// Resolved earlier in this process
    Memory,
    /// Persisted blob store keyed by lecture id
    #[serde(rename = "indexed-db")]
    BlobStore,
    /// Response cache keyed by the exact URL
    #[serde(rename = "cache-storage")]
    ResponseCache,
    /// Folder the user granted this session
    #[serde(rename = "local-filesystem")]
    LocalFolder,
    /// Nothing local; play from the URL
    Network,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheTier::Memory => "memory",
            CacheTier::BlobStore => "indexed-db",
            CacheTier::ResponseCache => "cache-storage",
            CacheTier::LocalFolder => "local-filesystem",
            CacheTier::Network => "network",
        };
        f.write_str(name)
    }
}

/// A playable source for a lecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAudio {
    /// `blob:` URL for local tiers, the network URL otherwise
    pub url: String,
    pub tier: CacheTier,
}

impl ResolvedAudio {
    /// Only the network was left; offer save-for-offline.
    pub fn is_network(&self) -> bool {
        self.tier == CacheTier::Network
    }
}

/// Default cap on audio bytes held by the memory tier.
pub const DEFAULT_MEMORY_LIMIT_BYTES: usize = 256 * 1024 * 1024;

/// In-memory tier. Lectures are evicted least recently resolved first once
/// the held bytes exceed `limit`.
struct BlobRegistry {
    by_lecture: HashMap<String, (String, CacheTier)>,
    blobs: HashMap<String, Arc<[u8]>>,
    recency: VecDeque<String>,
    held: usize,
    limit: usize,
}

impl BlobRegistry {
    fn new(limit: usize) -> Self {
        Self {
            by_lecture: HashMap::new(),
            blobs: HashMap::new(),
            recency: VecDeque::new(),
            held: 0,
            limit,
        }
    }

    fn touch(&mut self, lecture_id: &str) {
        if let Some(pos) = self.recency.iter().position(|id| id == lecture_id) {
            if let Some(id) = self.recency.remove(pos) {
                self.recency.push_back(id);
            }
        }
    }

    fn insert(&mut self, lecture_id: &str, url: String, tier: CacheTier, bytes: Arc<[u8]>) {
        self.remove(lecture_id);
        if bytes.len() > self.limit {
            debug!("Lecture {} too large to keep in memory", lecture_id);
            return;
        }

        self.held += bytes.len();
        self.blobs.insert(url.clone(), bytes);
        self.by_lecture.insert(lecture_id.to_string(), (url, tier));
        self.recency.push_back(lecture_id.to_string());

        while self.held > self.limit {
            let Some(oldest) = self.recency.front().cloned() else {
                break;
            };
            debug!("Evicting lecture {} from memory", oldest);
            self.remove(&oldest);
        }
    }

    fn remove(&mut self, lecture_id: &str) {
        if let Some((url, _)) = self.by_lecture.remove(lecture_id) {
            if let Some(bytes) = self.blobs.remove(&url) {
                self.held -= bytes.len();
            }
        }
        self.recency.retain(|id| id != lecture_id);
    }
}

/// Tiered audio lookup: memory, blob store, response cache, granted local
/// folder, then network. Tier failures count as misses.
pub struct OfflineAudioCache {
    registry: RwLock<BlobRegistry>,
    files: Arc<dyn KeyValueBlobStore>,
    responses: Arc<dyn KeyValueBlobStore>,
    folder: Arc<LocalFolderAccess>,
    fetcher: Arc<dyn AudioFetcher>,
}

impl OfflineAudioCache {
    pub fn new(
        files: Arc<dyn KeyValueBlobStore>,
        responses: Arc<dyn KeyValueBlobStore>,
        folder: Arc<LocalFolderAccess>,
        fetcher: Arc<dyn AudioFetcher>,
    ) -> Self {
        Self {
            registry: RwLock::new(BlobRegistry::new(DEFAULT_MEMORY_LIMIT_BYTES)),
            files,
            responses,
            folder,
            fetcher,
        }
    }

    /// Cap the audio bytes the memory tier holds at once.
    pub fn with_memory_limit(self, limit_bytes: usize) -> Self {
        if let Ok(mut registry) = self.registry.write() {
            registry.limit = limit_bytes;
        }
        self
    }

    /// Audio bytes currently held by the memory tier.
    pub fn memory_held(&self) -> usize {
        self.registry.read().map(|r| r.held).unwrap_or(0)
    }

    pub fn folder(&self) -> &LocalFolderAccess {
        &self.folder
    }

    /// Find the fastest playable source for a lecture. Never prompts; the
    /// local folder is only read if it was granted this session.
    pub async fn resolve(&self, lecture_id: &str, network_url: &str) -> ResolvedAudio {
        if let Some((url, _)) = self.registered(lecture_id) {
            debug!("Lecture {} resolved from memory", lecture_id);
            return ResolvedAudio {
                url,
                tier: CacheTier::Memory,
            };
        }

        if let Some((bytes, tier)) =
            self.lookup(CacheTier::BlobStore, lecture_id, self.files.get(lecture_id).await)
        {
            return self.register(lecture_id, bytes, tier);
        }

        if let Some((bytes, tier)) = self.lookup(
            CacheTier::ResponseCache,
            network_url,
            self.responses.get(network_url).await,
        ) {
            return self.register(lecture_id, bytes, tier);
        }

        if let Some(store) = self.folder.granted_store() {
            for name in folder_candidates(lecture_id, network_url) {
                if let Some((bytes, tier)) =
                    self.lookup(CacheTier::LocalFolder, &name, store.get(&name).await)
                {
                    return self.register(lecture_id, bytes, tier);
                }
            }
        }

        info!("Lecture {} not cached; using network", lecture_id);
        ResolvedAudio {
            url: network_url.to_string(),
            tier: CacheTier::Network,
        }
    }

    /// Download the audio fresh and keep it in the blob store, falling back
    /// to the response cache. Repeat calls overwrite. Returns false only
    /// when the download or both writes failed.
    pub async fn save_for_offline(&self, lecture_id: &str, network_url: &str) -> bool {
        let bytes = match self.fetcher.fetch_fresh(network_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Download for offline use failed ({}): {}", network_url, e);
                return false;
            }
        };

        // Drop any stale copy this process already handed out.
        self.forget(lecture_id);

        match self.files.put(lecture_id, &bytes).await {
            Ok(()) => {
                info!(
                    "Saved lecture {} for offline use ({} bytes, {})",
                    lecture_id,
                    bytes.len(),
                    CacheTier::BlobStore
                );
                return true;
            }
            Err(e) => warn!("Blob store write failed for {}: {}", lecture_id, e),
        }

        match self.responses.put(network_url, &bytes).await {
            Ok(()) => {
                info!(
                    "Saved lecture {} for offline use ({} bytes, {})",
                    lecture_id,
                    bytes.len(),
                    CacheTier::ResponseCache
                );
                true
            }
            Err(e) => {
                warn!("Response cache write failed for {}: {}", network_url, e);
                false
            }
        }
    }

    /// Ask the user for a local audio folder. `None` means the feature is
    /// unavailable, not an error.
    pub async fn request_local_folder_access(
        &self,
        gesture: UserGesture,
        picker: &dyn FolderPicker,
    ) -> Option<std::path::PathBuf> {
        self.folder.request(gesture, picker).await
    }

    /// Bytes behind a `blob:` URL handed out by [`resolve`](Self::resolve).
    pub fn blob(&self, blob_url: &str) -> Option<Arc<[u8]>> {
        let registry = self.registry.read().ok()?;
        registry.blobs.get(blob_url).cloned()
    }

    /// Release the in-memory copy for a lecture.
    pub fn forget(&self, lecture_id: &str) {
        if let Ok(mut registry) = self.registry.write() {
            registry.remove(lecture_id);
        }
    }

    fn lookup(
        &self,
        tier: CacheTier,
        key: &str,
        result: Result<Option<Vec<u8>>, StorageError>,
    ) -> Option<(Vec<u8>, CacheTier)> {
        match result {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                debug!("{} hit for {}", tier, key);
                Some((bytes, tier))
            }
            Ok(_) => {
                debug!("{} miss for {}", tier, key);
                None
            }
            Err(e) => {
                warn!("{} lookup failed for {}: {}", tier, key, e);
                None
            }
        }
    }

    fn registered(&self, lecture_id: &str) -> Option<(String, CacheTier)> {
        let mut registry = self.registry.write().ok()?;
        let entry = registry.by_lecture.get(lecture_id).cloned()?;
        registry.touch(lecture_id);
        Some(entry)
    }

    fn register(&self, lecture_id: &str, bytes: Vec<u8>, tier: CacheTier) -> ResolvedAudio {
        let url = format!("blob:scribe/{}", uuid::Uuid::new_v4());
        if let Ok(mut registry) = self.registry.write() {
            registry.insert(lecture_id, url.clone(), tier, Arc::from(bytes));
        }
        info!("Lecture {} resolved from {}", lecture_id, tier);
        ResolvedAudio { url, tier }
    }
}

/// File names a lecture may have in the local folder.
fn folder_candidates(lecture_id: &str, network_url: &str) -> Vec<String> {
    let from_url = file_name_of(network_url);
    let ext = from_url
        .as_deref()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_string())
        .unwrap_or_else(|| "mp3".to_string());

    let mut names: Vec<String> = from_url.into_iter().collect();
    let by_id = format!("{}.{}", lecture_id, ext);
    if !names.contains(&by_id) {
        names.push(by_id);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_candidates_use_url_name_then_lecture_id() {
        assert_eq!(
            folder_candidates("lec-42", "https://host/audio/42.mp3"),
            vec!["42.mp3".to_string(), "lec-42.mp3".to_string()]
        );
        assert_eq!(
            folder_candidates("lec-1", "https://host/"),
            vec!["lec-1.mp3".to_string()]
        );
    }

    #[test]
    fn tiers_use_storage_names() {
        assert_eq!(
            serde_json::to_string(&CacheTier::BlobStore).unwrap(),
            "\"indexed-db\""
        );
        assert_eq!(
            serde_json::to_string(&CacheTier::ResponseCache).unwrap(),
            "\"cache-storage\""
        );
        assert_eq!(CacheTier::LocalFolder.to_string(), "local-filesystem");
        assert_eq!(CacheTier::Memory.to_string(), "memory");
    }

    #[test]
    fn registry_evicts_least_recently_resolved() {
        let mut registry = BlobRegistry::new(10);
        registry.insert("a", "blob:a".into(), CacheTier::BlobStore, Arc::from(vec![0u8; 4]));
        registry.insert("b", "blob:b".into(), CacheTier::BlobStore, Arc::from(vec![0u8; 4]));
        registry.touch("a");
        registry.insert("c", "blob:c".into(), CacheTier::BlobStore, Arc::from(vec![0u8; 4]));

        assert!(registry.by_lecture.contains_key("a"));
        assert!(!registry.by_lecture.contains_key("b"));
        assert!(!registry.blobs.contains_key("blob:b"));
        assert_eq!(registry.held, 8);
    }
}
