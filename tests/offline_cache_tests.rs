// Integration tests for the offline audio cache
//
// The network is replaced by a counting fetcher; tiers are backed by
// memory stores, a sled database and on-disk directories in a temp dir.

use anyhow::Result;
use async_trait::async_trait;
use scribe_capture::cache::{
    AudioFetcher, AudioLocation, CacheTier, FolderPicker, KeyValueBlobStore, LocalFolderAccess,
    MemoryBlobStore, OfflineAudioCache, OfflineDatabase, PresetFolderPicker, ResponseCache,
    UserGesture, FOLDER_HANDLE_KEY,
};
use scribe_capture::StorageError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;

const URL: &str = "https://media.example.edu/uploads/lecture-42.mp3";
const AUDIO: &[u8] = b"ID3-fake-mp3-bytes";

struct CountingFetcher {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioFetcher for CountingFetcher {
    async fn fetch_fresh(&self, _url: &str) -> Result<Vec<u8>, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StorageError::Fetch("offline".to_string()));
        }
        Ok(AUDIO.to_vec())
    }
}

/// A tier whose storage is broken (quota exceeded, corrupted database).
struct BrokenStore;

#[async_trait]
impl KeyValueBlobStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Err(StorageError::Store("corrupted".to_string()))
    }

    async fn put(&self, _key: &str, _value: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::Store("quota exceeded".to_string()))
    }

    async fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

struct CountingPicker {
    folder: Option<PathBuf>,
    calls: AtomicUsize,
}

#[async_trait]
impl FolderPicker for CountingPicker {
    async fn pick_folder(&self) -> Option<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.folder.clone()
    }
}

struct Tiers {
    files: Arc<MemoryBlobStore>,
    responses: Arc<MemoryBlobStore>,
    handles: Arc<MemoryBlobStore>,
}

impl Tiers {
    fn new() -> Self {
        Self {
            files: Arc::new(MemoryBlobStore::new()),
            responses: Arc::new(MemoryBlobStore::new()),
            handles: Arc::new(MemoryBlobStore::new()),
        }
    }

    fn cache(&self, fetcher: Arc<CountingFetcher>) -> OfflineAudioCache {
        OfflineAudioCache::new(
            self.files.clone(),
            self.responses.clone(),
            Arc::new(LocalFolderAccess::new(self.handles.clone())),
            fetcher,
        )
    }
}

#[tokio::test]
async fn test_blob_store_hit_skips_network() -> Result<()> {
    let tiers = Tiers::new();
    tiers.files.put("lec-42", AUDIO).await?;
    let fetcher = CountingFetcher::new();
    let cache = tiers.cache(fetcher.clone());

    let resolved = cache.resolve("lec-42", URL).await;

    assert_eq!(resolved.tier, CacheTier::BlobStore);
    assert!(resolved.url.starts_with("blob:"));
    assert_eq!(cache.blob(&resolved.url).as_deref(), Some(AUDIO));
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(serde_json::to_value(&resolved)?["tier"], "indexed-db");

    // Second lookup is served from memory with the same URL
    let again = cache.resolve("lec-42", URL).await;
    assert_eq!(again.tier, CacheTier::Memory);
    assert_eq!(again.url, resolved.url);

    Ok(())
}

#[tokio::test]
async fn test_memory_tier_evicts_oldest_lectures() -> Result<()> {
    let tiers = Tiers::new();
    let lecture = vec![7u8; 100 * 1024];
    for n in 0..50 {
        tiers.files.put(&format!("lec-{}", n), &lecture).await?;
    }
    let cache = tiers.cache(CountingFetcher::new()).with_memory_limit(1024 * 1024);

    let first = cache.resolve("lec-0", URL).await;
    assert!(cache.blob(&first.url).is_some());

    let mut last = first.clone();
    for n in 1..50 {
        last = cache.resolve(&format!("lec-{}", n), URL).await;
    }

    assert!(cache.memory_held() <= 1024 * 1024);
    assert!(cache.blob(&first.url).is_none(), "oldest lecture evicted");
    assert_eq!(cache.blob(&last.url).map(|b| b.len()), Some(lecture.len()));

    // An evicted lecture falls back to its persistent tier
    let again = cache.resolve("lec-0", URL).await;
    assert_eq!(again.tier, CacheTier::BlobStore);

    Ok(())
}

#[tokio::test]
async fn test_response_cache_needs_exact_url() -> Result<()> {
    let tiers = Tiers::new();
    tiers.responses.put(URL, AUDIO).await?;
    let cache = tiers.cache(CountingFetcher::new());

    let other = cache.resolve("lec-42", &format!("{}?v=2", URL)).await;
    assert_eq!(other.tier, CacheTier::Network);

    let resolved = cache.resolve("lec-42", URL).await;
    assert_eq!(resolved.tier, CacheTier::ResponseCache);

    Ok(())
}

#[tokio::test]
async fn test_all_tiers_miss_falls_back_to_network() -> Result<()> {
    let tiers = Tiers::new();
    let fetcher = CountingFetcher::new();
    let cache = tiers.cache(fetcher.clone());

    let resolved = cache.resolve("lec-42", URL).await;

    assert!(resolved.is_network());
    assert_eq!(resolved.url, URL);
    assert_eq!(fetcher.calls(), 0, "resolve never downloads");

    Ok(())
}

#[tokio::test]
async fn test_local_folder_only_after_grant() -> Result<()> {
    let folder = TempDir::new()?;
    std::fs::write(folder.path().join("lecture-42.mp3"), AUDIO)?;

    let tiers = Tiers::new();
    // Remembered from an earlier session, but not granted in this one
    tiers
        .handles
        .put(FOLDER_HANDLE_KEY, folder.path().to_string_lossy().as_bytes())
        .await?;
    let cache = tiers.cache(CountingFetcher::new());
    let picker = CountingPicker {
        folder: Some(folder.path().to_path_buf()),
        calls: AtomicUsize::new(0),
    };

    let before = cache.resolve("lec-42", URL).await;
    assert_eq!(before.tier, CacheTier::Network);
    assert_eq!(picker.calls.load(Ordering::SeqCst), 0, "resolve must not prompt");
    assert_eq!(cache.folder().remembered().await, Some(folder.path().to_path_buf()));
    assert!(!cache.folder().is_granted());

    let granted = cache
        .request_local_folder_access(UserGesture::from_user_action(), &picker)
        .await;
    assert_eq!(granted, Some(folder.path().to_path_buf()));
    assert_eq!(picker.calls.load(Ordering::SeqCst), 1);

    let after = cache.resolve("lec-42", URL).await;
    assert_eq!(after.tier, CacheTier::LocalFolder);
    assert_eq!(cache.blob(&after.url).as_deref(), Some(AUDIO));

    Ok(())
}

#[tokio::test]
async fn test_local_folder_matches_lecture_id() -> Result<()> {
    let folder = TempDir::new()?;
    std::fs::write(folder.path().join("lec-7.mp3"), AUDIO)?;

    let tiers = Tiers::new();
    let cache = tiers.cache(CountingFetcher::new());
    let picker = PresetFolderPicker(Some(folder.path().to_path_buf()));
    cache
        .request_local_folder_access(UserGesture::from_user_action(), &picker)
        .await;

    let resolved = cache
        .resolve("lec-7", "https://media.example.edu/uploads/renamed.mp3")
        .await;
    assert_eq!(resolved.tier, CacheTier::LocalFolder);

    Ok(())
}

#[tokio::test]
async fn test_declined_folder_request_is_not_an_error() -> Result<()> {
    let tiers = Tiers::new();
    let cache = tiers.cache(CountingFetcher::new());

    let granted = cache
        .request_local_folder_access(UserGesture::from_user_action(), &PresetFolderPicker(None))
        .await;

    assert_eq!(granted, None);
    assert!(!cache.folder().is_granted());
    assert!(tiers.handles.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_save_for_offline_is_idempotent() -> Result<()> {
    let tiers = Tiers::new();
    let fetcher = CountingFetcher::new();
    let cache = tiers.cache(fetcher.clone());

    assert!(cache.save_for_offline("lec-42", URL).await);
    assert!(cache.save_for_offline("lec-42", URL).await);

    assert_eq!(fetcher.calls(), 2, "every save downloads fresh");
    assert_eq!(tiers.files.len(), 1);
    assert!(tiers.responses.is_empty());

    let resolved = cache.resolve("lec-42", URL).await;
    assert_eq!(resolved.tier, CacheTier::BlobStore);

    Ok(())
}

#[tokio::test]
async fn test_save_falls_back_to_response_cache() -> Result<()> {
    let responses = Arc::new(MemoryBlobStore::new());
    let fetcher = CountingFetcher::new();
    let cache = OfflineAudioCache::new(
        Arc::new(BrokenStore),
        responses.clone(),
        Arc::new(LocalFolderAccess::new(Arc::new(MemoryBlobStore::new()))),
        fetcher,
    );

    assert!(cache.save_for_offline("lec-42", URL).await);
    assert_eq!(responses.len(), 1);

    // The broken blob store reads as a miss
    let resolved = cache.resolve("lec-42", URL).await;
    assert_eq!(resolved.tier, CacheTier::ResponseCache);

    Ok(())
}

#[tokio::test]
async fn test_failed_download_saves_nothing() -> Result<()> {
    let tiers = Tiers::new();
    let cache = tiers.cache(CountingFetcher::failing());

    assert!(!cache.save_for_offline("lec-42", URL).await);
    assert!(tiers.files.is_empty());
    assert!(tiers.responses.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_persistent_tiers_outlive_memory() -> Result<()> {
    let dir = TempDir::new()?;
    let db = OfflineDatabase::open(dir.path().join("offline.sled"))?;
    let responses_path = dir.path().join("responses");

    let first = OfflineAudioCache::new(
        Arc::new(db.files()?),
        Arc::new(ResponseCache::new(&responses_path)),
        Arc::new(LocalFolderAccess::new(Arc::new(db.handles()?))),
        CountingFetcher::new(),
    );
    assert!(first.save_for_offline("lec-42", URL).await);
    drop(first);

    // A fresh cache has an empty memory tier but sees the persisted blob
    let files = db.files()?;
    assert_eq!(files.len(), 1);

    let fetcher = CountingFetcher::new();
    let cache = OfflineAudioCache::new(
        Arc::new(files),
        Arc::new(ResponseCache::new(&responses_path)),
        Arc::new(LocalFolderAccess::new(Arc::new(db.handles()?))),
        fetcher.clone(),
    );
    let resolved = cache.resolve("lec-42", URL).await;
    assert_eq!(resolved.tier, CacheTier::BlobStore);
    assert_eq!(cache.blob(&resolved.url).as_deref(), Some(AUDIO));
    assert_eq!(fetcher.calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_response_cache_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = ResponseCache::new(dir.path().join("responses"));

    assert_eq!(cache.get(URL).await?, None);
    cache.put(URL, AUDIO).await?;
    cache.put(URL, AUDIO).await?;

    assert_eq!(cache.get(URL).await?.as_deref(), Some(AUDIO));
    assert_eq!(cache.len().await?, 1);

    cache.remove(URL).await?;
    assert_eq!(cache.get(URL).await?, None);

    Ok(())
}

#[test]
fn test_local_location_resolves_against_media_base() -> Result<()> {
    let base = Url::parse("https://media.example.edu/")?;

    let location = AudioLocation::parse("/uploads/lecture-42.mp3")?;
    assert_eq!(location.network_url(&base)?.as_str(), URL);

    Ok(())
}
